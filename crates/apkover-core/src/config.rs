//! Melange package configuration model
//!
//! Only the parts of a Melange document that coverage instrumentation
//! touches are typed: the package identity, the build pipeline, the build
//! environment and the test block. Every other key is kept in an `extra`
//! mapping so that a load/persist cycle preserves the meaning of the
//! document even though formatting and key order may change.
//!
//! Typed string fields keep the source text of unquoted scalars, so
//! `version: 1.10` stays `1.10` rather than becoming the float `1.1`.

use crate::error::{ConfigError, Result};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

/// A Melange package configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Configuration {
    /// Package identity.
    pub package: Package,

    /// Build-time environment.
    #[serde(skip_serializing_if = "Environment::is_empty")]
    pub environment: Environment,

    /// Ordered build steps.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<Step>,

    /// Test phase, run against the built package.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<TestPhase>,

    /// Keys not modelled here (subpackages, update, vars, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The `package` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Package {
    pub name: String,

    /// Melange versions are strings, but unquoted YAML like `1.2` is common.
    pub version: String,

    pub epoch: u64,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// An `environment` block, attachable to the build and to the test phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Environment {
    /// Packages installed in the build or test guest.
    #[serde(skip_serializing_if = "Contents::is_empty")]
    pub contents: Contents,

    /// Environment variables exported to every step.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Environment {
    /// Whether serialising this block would produce an empty mapping.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty() && self.environment.is_empty() && self.extra.is_empty()
    }
}

/// The `contents` block of an environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Contents {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,

    /// Repositories, keyrings and anything else.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Contents {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.extra.is_empty()
    }
}

/// A single pipeline step: either a built-in action (`uses` + `with`)
/// or a literal shell script (`runs`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Step {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Built-in action identifier, e.g. `go/build`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,

    /// Parameters of the built-in action.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,

    /// Shell script executed by the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Step {
    /// A step invoking a built-in action.
    pub fn uses(action: impl Into<String>) -> Self {
        Self {
            uses: Some(action.into()),
            ..Self::default()
        }
    }

    /// A step running a shell script.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            runs: Some(script.into()),
            ..Self::default()
        }
    }

    /// The shell script of the step, empty for action steps.
    pub fn script(&self) -> &str {
        self.runs.as_deref().unwrap_or_default()
    }

    /// Whether the step invokes the given built-in action.
    pub fn is_action(&self, action: &str) -> bool {
        self.uses.as_deref() == Some(action)
    }
}

/// The `test` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestPhase {
    #[serde(skip_serializing_if = "Environment::is_empty")]
    pub environment: Environment,

    pub pipeline: Vec<Step>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Configuration {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a configuration from YAML text.
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Serialise the configuration to YAML text.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ConfigError::Serialize)
    }

    /// Write the configuration to `path`, returning the digest of what
    /// was written.
    pub fn persist(&self, path: &Path) -> Result<String> {
        let content = self.to_yaml()?;
        std::fs::write(path, content.as_bytes()).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let digest = digest_bytes(content.as_bytes());
        debug!(path = %path.display(), digest = %digest, "Persisted package config");
        Ok(digest)
    }

    /// SHA-256 hex digest of the serialised configuration.
    pub fn digest(&self) -> Result<String> {
        Ok(digest_bytes(self.to_yaml()?.as_bytes()))
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.package.name
    }

    /// The test phase, created empty when the package declares none.
    pub fn test_mut(&mut self) -> &mut TestPhase {
        self.test.get_or_insert_with(TestPhase::default)
    }
}

fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Key-by-key decoding of a mapping into a typed block.
///
/// `#[serde(flatten)]` would buffer the whole mapping first, turning
/// `1.10` into a float before a string field ever sees it. Decoding each
/// value straight from the YAML deserializer keeps the scalar text.
trait MapFields: Default {
    const EXPECTING: &'static str;

    /// Keys that must be present.
    const REQUIRED: &'static [&'static str] = &[];

    fn field<'de, A>(&mut self, key: String, map: &mut A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>;
}

struct FieldsVisitor<T>(PhantomData<T>);

impl<'de, T: MapFields> Visitor<'de> for FieldsVisitor<T> {
    type Value = T;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(T::EXPECTING)
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<T, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut value = T::default();
        let mut missing = T::REQUIRED.to_vec();
        while let Some(key) = map.next_key::<String>()? {
            missing.retain(|field| *field != key);
            value.field(key, &mut map)?;
        }

        match missing.first() {
            Some(field) => Err(de::Error::missing_field(*field)),
            None => Ok(value),
        }
    }
}

macro_rules! deserialize_fields {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
                where
                    D: Deserializer<'de>,
                {
                    deserializer.deserialize_map(FieldsVisitor::<$ty>(PhantomData))
                }
            }
        )*
    };
}

deserialize_fields!(Configuration, Package, Environment, Contents, Step, TestPhase);

impl MapFields for Configuration {
    const EXPECTING: &'static str = "a Melange package configuration";
    const REQUIRED: &'static [&'static str] = &["package"];

    fn field<'de, A>(&mut self, key: String, map: &mut A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        match key.as_str() {
            "package" => self.package = map.next_value()?,
            "environment" => self.environment = map.next_value()?,
            "pipeline" => self.pipeline = map.next_value()?,
            "test" => self.test = map.next_value()?,
            _ => {
                self.extra.insert(key, map.next_value()?);
            }
        }
        Ok(())
    }
}

impl MapFields for Package {
    const EXPECTING: &'static str = "a package block";
    const REQUIRED: &'static [&'static str] = &["name", "version"];

    fn field<'de, A>(&mut self, key: String, map: &mut A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        match key.as_str() {
            "name" => self.name = map.next_value()?,
            "version" => self.version = map.next_value()?,
            "epoch" => self.epoch = map.next_value()?,
            _ => {
                self.extra.insert(key, map.next_value()?);
            }
        }
        Ok(())
    }
}

impl MapFields for Environment {
    const EXPECTING: &'static str = "an environment block";

    fn field<'de, A>(&mut self, key: String, map: &mut A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        match key.as_str() {
            "contents" => self.contents = map.next_value()?,
            "environment" => {
                self.environment = map
                    .next_value::<Option<BTreeMap<String, String>>>()?
                    .unwrap_or_default()
            }
            _ => {
                self.extra.insert(key, map.next_value()?);
            }
        }
        Ok(())
    }
}

impl MapFields for Contents {
    const EXPECTING: &'static str = "a contents block";

    fn field<'de, A>(&mut self, key: String, map: &mut A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        match key.as_str() {
            "packages" => {
                self.packages = map.next_value::<Option<Vec<String>>>()?.unwrap_or_default()
            }
            _ => {
                self.extra.insert(key, map.next_value()?);
            }
        }
        Ok(())
    }
}

impl MapFields for Step {
    const EXPECTING: &'static str = "a pipeline step";

    fn field<'de, A>(&mut self, key: String, map: &mut A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        match key.as_str() {
            "name" => self.name = map.next_value()?,
            "uses" => self.uses = map.next_value()?,
            "with" => {
                self.with = map
                    .next_value::<Option<BTreeMap<String, String>>>()?
                    .unwrap_or_default()
            }
            "runs" => self.runs = map.next_value()?,
            _ => {
                self.extra.insert(key, map.next_value()?);
            }
        }
        Ok(())
    }
}

impl MapFields for TestPhase {
    const EXPECTING: &'static str = "a test block";

    fn field<'de, A>(&mut self, key: String, map: &mut A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        match key.as_str() {
            "environment" => self.environment = map.next_value()?,
            "pipeline" => {
                self.pipeline = map.next_value::<Option<Vec<Step>>>()?.unwrap_or_default()
            }
            _ => {
                self.extra.insert(key, map.next_value()?);
            }
        }
        Ok(())
    }
}
