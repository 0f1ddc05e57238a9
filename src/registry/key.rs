//! Channel key derivation

/// Registry key for a channel: md5 hex over `addr`, or over
/// `addr@if1,if2,...` when interfaces are given. Interface order is part
/// of the key.
pub fn hub_key(addr: &str, ifaces: &[String]) -> String {
    let mut input = addr.to_string();
    if !ifaces.is_empty() {
        input.push('@');
        input.push_str(&ifaces.join(","));
    }
    format!("{:x}", md5::compute(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_md5_hex_of_address() {
        let key = hub_key("239.0.0.1:1234", &[]);

        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, format!("{:x}", md5::compute("239.0.0.1:1234")));
    }

    #[test]
    fn test_key_includes_interfaces() {
        let plain = hub_key("239.0.0.1:1234", &[]);
        let scoped = hub_key("239.0.0.1:1234", &["eth0".into()]);

        assert_ne!(plain, scoped);
        assert_eq!(
            scoped,
            format!("{:x}", md5::compute("239.0.0.1:1234@eth0"))
        );
    }

    #[test]
    fn test_key_distinguishes_interface_lists() {
        let a = hub_key("239.0.0.1:1234", &["eth0".into()]);
        let b = hub_key("239.0.0.1:1234", &["eth1".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_interface_order_matters() {
        let ab = hub_key("239.0.0.1:1234", &["eth0".into(), "eth1".into()]);
        let ba = hub_key("239.0.0.1:1234", &["eth1".into(), "eth0".into()]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_key_is_stable() {
        let a = hub_key("239.0.0.1:1234", &["eth0".into()]);
        let b = hub_key("239.0.0.1:1234", &["eth0".into()]);
        assert_eq!(a, b);
    }
}
