//! Object path helpers.

/// Extract the device address from a device object path.
///
/// `/org/bluez/hci0/dev_A0_E6_F8_8A_4D_5C` → `A0:E6:F8:8A:4D:5C`. Any
/// trailing path segments (services, characteristics) are ignored, and the
/// result is uppercased. Returns `None` when the path has no `dev_` segment.
pub fn address_from_path(path: &str) -> Option<String> {
    let idx = path.rfind("dev_")?;
    let tail = &path[idx + 4..];
    let segment = tail.split('/').next().unwrap_or(tail);
    if segment.is_empty() {
        return None;
    }
    Some(segment.replace('_', ":").to_ascii_uppercase())
}

/// Whether `child` lies below `parent` in the object tree.
pub fn is_descendant(child: &str, parent: &str) -> bool {
    child.len() > parent.len() && child.starts_with(parent) && child[parent.len()..].starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_path() {
        assert_eq!(
            address_from_path("/org/bluez/hci0/dev_A0_E6_F8_8A_4D_5C").as_deref(),
            Some("A0:E6:F8:8A:4D:5C")
        );
    }

    #[test]
    fn test_address_from_nested_path() {
        assert_eq!(
            address_from_path("/org/bluez/hci0/dev_a0_e6_f8_8a_4d_5c/service000a/char000b")
                .as_deref(),
            Some("A0:E6:F8:8A:4D:5C")
        );
    }

    #[test]
    fn test_address_parsing_is_idempotent() {
        let addr = address_from_path("/org/bluez/hci0/dev_A0_E6_F8_8A_4D_5C").unwrap();
        let again = address_from_path(&format!("/org/bluez/hci0/dev_{}", addr.replace(':', "_")));
        assert_eq!(again.as_deref(), Some(addr.as_str()));
    }

    #[test]
    fn test_no_device_segment() {
        assert_eq!(address_from_path("/org/bluez/hci0"), None);
        assert_eq!(address_from_path("/org/bluez/hci0/dev_"), None);
    }

    #[test]
    fn test_is_descendant() {
        assert!(is_descendant(
            "/org/bluez/hci0/dev_00_11/service000a",
            "/org/bluez/hci0/dev_00_11"
        ));
        assert!(!is_descendant("/org/bluez/hci0/dev_00_112", "/org/bluez/hci0/dev_00_11"));
    }
}
