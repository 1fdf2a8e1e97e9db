//! The build configuration of a package spec

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use spk_version::{Compatibility, COMPATIBLE};

use crate::option_map::OptionMap;

use super::option::Opt;

/// A build script, stored as a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Script(pub Vec<String>);

impl Default for Script {
    fn default() -> Self {
        Script(vec!["sh ./build.sh".to_string()])
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("\n"))
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Script, D::Error> {
        struct ScriptVisitor;

        impl<'de> serde::de::Visitor<'de> for ScriptVisitor {
            type Value = Script;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a string or list of strings")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Script, E> {
                Ok(Script(v.lines().map(str::to_string).collect()))
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Script, A::Error> {
                let mut lines = Vec::new();
                while let Some(line) = seq.next_element::<String>()? {
                    lines.push(line);
                }
                Ok(Script(lines))
            }
        }

        deserializer.deserialize_any(ScriptVisitor)
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// How to build a package and which options it exposes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    #[serde(default)]
    pub script: Script,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Opt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<OptionMap>,
}

impl BuildSpec {
    pub fn is_default(&self) -> bool {
        self == &BuildSpec::default()
    }

    /// Find a declared option by name.
    pub fn opt(&self, name: &str) -> Option<&Opt> {
        self.options.iter().find(|opt| opt.name() == name)
    }

    /// The value each declared option takes under the given inputs.
    ///
    /// Input values are looked up in the package's namespace first
    /// and then globally, and fall back to the option defaults.
    pub fn resolve_all_options(&self, package_name: Option<&str>, given: &OptionMap) -> OptionMap {
        let mut resolved = OptionMap::default();
        for opt in &self.options {
            let name = opt.name();
            let value = match package_name {
                Some(package) => given.package_value(package, name),
                None => given.get(name),
            };
            resolved.insert(name.to_string(), opt.get_value(value.map(String::as_str)));
        }
        resolved
    }

    /// Check that the given input values are usable for this build.
    pub fn validate_options(&self, package_name: &str, given: &OptionMap) -> Compatibility {
        for opt in &self.options {
            let value = given.package_value(package_name, opt.name());
            let compat = opt.validate(value.map(String::as_str));
            if !compat.is_ok() {
                return compat;
            }
        }
        COMPATIBLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_from_string_or_list() {
        let spec: BuildSpec = serde_yaml::from_str("{script: \"echo hi\\necho bye\"}").unwrap();
        assert_eq!(spec.script.0, vec!["echo hi", "echo bye"]);

        let spec: BuildSpec = serde_yaml::from_str("{script: [echo hi, echo bye]}").unwrap();
        assert_eq!(spec.script.0, vec!["echo hi", "echo bye"]);
    }

    #[test]
    fn test_resolve_all_options() {
        let spec: BuildSpec = serde_yaml::from_str(
            "{options: [{var: debug, default: off}, {var: abi, default: cp27}]}",
        )
        .unwrap();

        let given: OptionMap = [("debug".to_string(), "on".to_string())].into_iter().collect();
        let resolved = spec.resolve_all_options(Some("my-pkg"), &given);
        assert_eq!(resolved.get("debug"), Some(&"on".to_string()));
        assert_eq!(resolved.get("abi"), Some(&"cp27".to_string()));
    }

    #[test]
    fn test_resolve_prefers_namespaced_values() {
        let spec: BuildSpec =
            serde_yaml::from_str("{options: [{var: debug, default: off}]}").unwrap();

        let given: OptionMap = [
            ("debug".to_string(), "on".to_string()),
            ("my-pkg.debug".to_string(), "off".to_string()),
        ]
        .into_iter()
        .collect();
        let resolved = spec.resolve_all_options(Some("my-pkg"), &given);
        assert_eq!(resolved.get("debug"), Some(&"off".to_string()));
    }

    #[test]
    fn test_validate_options_choices() {
        let spec: BuildSpec =
            serde_yaml::from_str("{options: [{var: abi, choices: [cp27, cp37]}]}").unwrap();

        let good: OptionMap = [("abi".to_string(), "cp27".to_string())].into_iter().collect();
        assert!(spec.validate_options("my-pkg", &good).is_ok());

        let bad: OptionMap = [("abi".to_string(), "cp99".to_string())].into_iter().collect();
        assert!(!spec.validate_options("my-pkg", &bad).is_ok());
    }
}
