//! Package test definitions

use serde::{Deserialize, Serialize};

use crate::option_map::OptionMap;
use crate::request::Request;

use super::build_spec::Script;

/// The stage of the packaging process that a test runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStage {
    Sources,
    Build,
    Install,
}

impl std::fmt::Display for TestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStage::Sources => f.write_str("sources"),
            TestStage::Build => f.write_str("build"),
            TestStage::Install => f.write_str("install"),
        }
    }
}

/// A test script to run against one stage of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    pub stage: TestStage,
    pub script: Script,
    /// Restrict the test to builds matching any of these option sets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<OptionMap>,
    /// Additional packages required in the test environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Request>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_parsing() {
        let spec: TestSpec =
            serde_yaml::from_str("{stage: install, script: \"echo hello\"}").unwrap();
        assert_eq!(spec.stage, TestStage::Install);

        let res = serde_yaml::from_str::<TestSpec>("{stage: verify, script: \"echo hello\"}");
        assert!(res.is_err(), "unknown stages should be rejected");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let res = serde_yaml::from_str::<TestSpec>(
            "{stage: build, script: \"echo\", environment: [what]}",
        );
        assert!(res.is_err());
    }
}
