//! Option maps: named string values that select and describe builds

use std::collections::BTreeMap;

use serde::de::MapAccess;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest as _, Sha1};

/// The number of digest characters used to identify a build.
///
/// Option digests are namespaced by the package itself so a short
/// prefix of the full hash is plenty to avoid collisions.
pub const DIGEST_SIZE: usize = 8;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// A set of values for package build options.
///
/// Keys are either global (`debug`) or namespaced to one package
/// (`python.abi`). The map iterates in lexicographic key order, which
/// makes its digest independent of insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OptionMap {
    options: BTreeMap<String, String>,
}

impl OptionMap {
    /// The digest of these options, used to identify a build.
    pub fn digest(&self) -> String {
        let mut hasher = Sha1::new();
        for (name, value) in self.options.iter() {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        base32_encode(&digest)
            .chars()
            .take(DIGEST_SIZE)
            .collect()
    }

    /// The entries that are not namespaced to any one package.
    pub fn global_options(&self) -> OptionMap {
        self.options
            .iter()
            .filter(|(name, _)| !name.contains('.'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// The options visible to the named package: global entries
    /// overlaid by the entries in the package's own namespace, with
    /// the namespace prefix removed.
    pub fn package_options(&self, name: impl AsRef<str>) -> OptionMap {
        let prefix = format!("{}.", name.as_ref());
        let mut options = self.global_options();
        for (key, value) in self.options.iter() {
            if let Some(base) = key.strip_prefix(&prefix) {
                options.insert(base.to_string(), value.clone());
            }
        }
        options
    }

    /// Look up an option for the named package, preferring the
    /// package's namespace over the global one.
    pub fn package_value(&self, package: &str, option: &str) -> Option<&String> {
        self.options
            .get(&format!("{package}.{option}"))
            .or_else(|| self.options.get(option))
    }
}

impl std::ops::Deref for OptionMap {
    type Target = BTreeMap<String, String>;

    fn deref(&self) -> &Self::Target {
        &self.options
    }
}

impl std::ops::DerefMut for OptionMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.options
    }
}

impl FromIterator<(String, String)> for OptionMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        OptionMap {
            options: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for OptionMap {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.options.into_iter()
    }
}

impl std::fmt::Display for OptionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered = self
            .options
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{rendered}}}")
    }
}

impl<'de> Deserialize<'de> for OptionMap {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<OptionMap, D::Error> {
        struct OptionMapVisitor;

        impl<'de> serde::de::Visitor<'de> for OptionMapVisitor {
            type Value = OptionMap;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of option names to values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<OptionMap, A::Error> {
                let mut options = OptionMap::default();
                while let Some((name, value)) = access.next_entry::<String, Stringified>()? {
                    options.insert(name, value.0);
                }
                Ok(options)
            }
        }

        deserializer.deserialize_map(OptionMapVisitor)
    }
}

/// Detect the default options for the current host system.
pub fn host_options() -> OptionMap {
    let mut options = OptionMap::default();
    options.insert("arch".to_string(), std::env::consts::ARCH.to_string());
    options.insert("os".to_string(), std::env::consts::OS.to_string());
    options
}

/// A string deserialized from any scalar value.
///
/// Spec files routinely say `default: 101` or `debug: true`; all
/// option values are canonicalized to strings at parse time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stringified(pub String);

impl<'de> Deserialize<'de> for Stringified {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Stringified, D::Error> {
        struct StringifyVisitor;

        impl<'de> serde::de::Visitor<'de> for StringifyVisitor {
            type Value = Stringified;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a scalar value")
            }

            fn visit_str<E: serde::de::Error>(
                self,
                v: &str,
            ) -> std::result::Result<Stringified, E> {
                Ok(Stringified(v.to_string()))
            }

            fn visit_bool<E: serde::de::Error>(
                self,
                v: bool,
            ) -> std::result::Result<Stringified, E> {
                Ok(Stringified(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(
                self,
                v: i64,
            ) -> std::result::Result<Stringified, E> {
                Ok(Stringified(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(
                self,
                v: u64,
            ) -> std::result::Result<Stringified, E> {
                Ok(Stringified(v.to_string()))
            }

            fn visit_f64<E: serde::de::Error>(
                self,
                v: f64,
            ) -> std::result::Result<Stringified, E> {
                Ok(Stringified(v.to_string()))
            }
        }

        deserializer.deserialize_any(StringifyVisitor)
    }
}

impl Serialize for Stringified {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Standard base32 rendering of the given bytes, without padding.
fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 8 / 5 + 1);
    let mut buffer: u32 = 0;
    let mut bits = 0usize;
    for byte in data {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = (buffer >> bits) & 0x1f;
            out.push(BASE32_ALPHABET[index as usize] as char);
        }
    }
    if bits > 0 {
        let index = (buffer << (5 - bits)) & 0x1f;
        out.push(BASE32_ALPHABET[index as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_stable_under_insertion_order() {
        let mut a = OptionMap::default();
        a.insert("debug".to_string(), "off".to_string());
        a.insert("python.abi".to_string(), "cp37m".to_string());

        let mut b = OptionMap::default();
        b.insert("python.abi".to_string(), "cp37m".to_string());
        b.insert("debug".to_string(), "off".to_string());

        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), DIGEST_SIZE);
    }

    #[test]
    fn test_digest_changes_with_content() {
        let a: OptionMap = [("debug".to_string(), "on".to_string())].into_iter().collect();
        let b: OptionMap = [("debug".to_string(), "off".to_string())].into_iter().collect();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_is_valid_build() {
        let options = OptionMap::default();
        crate::parse_build(options.digest()).expect("digests parse as builds");
    }

    #[test]
    fn test_package_options() {
        let options: OptionMap = [
            ("debug".to_string(), "off".to_string()),
            ("python.abi".to_string(), "cp37m".to_string()),
            ("gcc.version".to_string(), "6.3".to_string()),
        ]
        .into_iter()
        .collect();

        let visible = options.package_options("python");
        assert_eq!(visible.get("abi"), Some(&"cp37m".to_string()));
        assert_eq!(visible.get("debug"), Some(&"off".to_string()));
        assert!(visible.get("version").is_none());

        assert_eq!(
            options.package_value("python", "abi"),
            Some(&"cp37m".to_string())
        );
        assert_eq!(
            options.package_value("gcc", "debug"),
            Some(&"off".to_string())
        );
    }

    #[test]
    fn test_scalar_values_stringified() {
        let options: OptionMap =
            serde_yaml::from_str("{debug: true, optimize: 2, name: hello}").unwrap();
        assert_eq!(options.get("debug"), Some(&"true".to_string()));
        assert_eq!(options.get("optimize"), Some(&"2".to_string()));
        assert_eq!(options.get("name"), Some(&"hello".to_string()));
    }

    #[test]
    fn test_base32_known_value() {
        // RFC 4648 test vector
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
    }
}
