// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::WorkerCount;
use crate::{
    errors::{ConfigParseError, ProfileNotFound},
    manifest::ManifestWindow,
    scheduler::RunOptions,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeMap, time::Duration};
use tracing::debug;

/// Overall configuration for hivetest.
///
/// Most settings are managed through profiles, obtained through the [`profile`](Self::profile)
/// method.
#[derive(Clone, Debug)]
pub struct HivetestConfig {
    base_dir: Utf8PathBuf,
    inner: HivetestConfigDeserialize,
}

impl HivetestConfig {
    /// The default location of the config within the base directory.
    pub const CONFIG_PATH: &'static str = ".config/hivetest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the config from the given file, or if not specified from `.config/hivetest.toml`
    /// in the base directory. A missing `.config/hivetest.toml` is not an error.
    pub fn from_sources(
        base_dir: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let base_dir = base_dir.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = base_dir.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };
        debug!(%config_file, "reading config");

        let inner = Self::make_default_config()
            .add_source(source)
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|err| ConfigParseError::new(&config_file, err))?;
        Ok(Self { base_dir, inner })
    }

    /// Returns the default config, without reading any files.
    pub fn default_config(base_dir: impl Into<Utf8PathBuf>) -> Result<Self, ConfigParseError> {
        let inner = Self::make_default_config()
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|err| ConfigParseError::new("<default config>", err))?;
        Ok(Self {
            base_dir: base_dir.into(),
            inner,
        })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Returns the profile with the given name, or an error if it isn't known.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<HivetestProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom = match name {
            Self::DEFAULT_PROFILE => None,
            _ => Some(self.inner.profile.other.get(name).ok_or_else(|| {
                ProfileNotFound::new(name, self.all_profiles())
            })?),
        };

        let mut store_dir = self.base_dir.join(&self.inner.store.dir);
        store_dir.push(name);
        Ok(HivetestProfile {
            name: name.to_owned(),
            store_dir,
            default: &self.inner.profile.default,
            custom,
        })
    }

    fn all_profiles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(Self::DEFAULT_PROFILE)
            .chain(self.inner.profile.other.keys().map(|name| name.as_str()))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }
}

/// A resolved profile. Settings it doesn't specify fall back to the default profile.
#[derive(Clone, Debug)]
pub struct HivetestProfile<'cfg> {
    name: String,
    store_dir: Utf8PathBuf,
    default: &'cfg DefaultProfileImpl,
    custom: Option<&'cfg CustomProfileImpl>,
}

impl HivetestProfile<'_> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the directory the timing manifest for this profile lives in.
    pub fn store_dir(&self) -> &Utf8Path {
        &self.store_dir
    }

    /// Returns the default time limit.
    pub fn timeout(&self) -> Duration {
        self.custom
            .and_then(|custom| custom.timeout)
            .unwrap_or(self.default.timeout)
    }

    /// Returns true if the run stops at the first failure.
    pub fn bail(&self) -> bool {
        self.custom
            .and_then(|custom| custom.bail)
            .unwrap_or(self.default.bail)
    }

    /// Returns true if tests stop at their first failed assertion.
    pub fn assertive(&self) -> bool {
        self.custom
            .and_then(|custom| custom.assertive)
            .unwrap_or(self.default.assertive)
    }

    /// Returns the number of workers.
    pub fn workers(&self) -> WorkerCount {
        self.custom
            .and_then(|custom| custom.workers)
            .unwrap_or(self.default.workers)
    }

    /// Returns the window used to estimate file durations.
    pub fn manifest_window(&self) -> ManifestWindow {
        self.custom
            .and_then(|custom| custom.manifest_window)
            .unwrap_or(self.default.manifest_window)
    }

    /// Returns run options for this profile, without any title patterns.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout: self.timeout(),
            bail: self.bail(),
            assertive: self.assertive(),
            grep: None,
            ignore: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HivetestConfigDeserialize {
    store: StoreConfigImpl,
    profile: ProfilesDeserialize,
}

#[derive(Clone, Debug, Deserialize)]
struct StoreConfigImpl {
    dir: Utf8PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
struct ProfilesDeserialize {
    default: DefaultProfileImpl,
    #[serde(flatten)]
    other: BTreeMap<String, CustomProfileImpl>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DefaultProfileImpl {
    #[serde(with = "humantime_serde")]
    timeout: Duration,
    bail: bool,
    assertive: bool,
    workers: WorkerCount,
    manifest_window: ManifestWindow,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default)]
    bail: Option<bool>,
    #[serde(default)]
    assertive: Option<bool>,
    #[serde(default)]
    workers: Option<WorkerCount>,
    #[serde(default)]
    manifest_window: Option<ManifestWindow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn write_config(dir: &Utf8Path, contents: &str) {
        let config_dir = dir.join(".config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("hivetest.toml"), contents).unwrap();
    }

    #[test]
    fn default_config_is_valid() {
        let config = HivetestConfig::default_config("/base").unwrap();
        let profile = config.profile(HivetestConfig::DEFAULT_PROFILE).unwrap();
        assert_eq!(profile.timeout(), Duration::from_secs(2));
        assert!(!profile.bail());
        assert!(!profile.assertive());
        assert_eq!(profile.workers(), WorkerCount::NumCpus);
        assert_eq!(profile.manifest_window(), ManifestWindow::Latest);
        assert_eq!(
            profile.store_dir(),
            Utf8Path::new("/base/target/hivetest/default")
        );

        let ci = config.profile("ci").unwrap();
        assert_eq!(ci.timeout(), Duration::from_secs(10));
        assert_eq!(ci.manifest_window(), ManifestWindow::Short);
        assert_eq!(ci.workers(), WorkerCount::NumCpus);
    }

    #[test]
    fn repository_config_layers_over_default() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            indoc! {r#"
                [store]
                dir = "cache"

                [profile.default]
                workers = 3

                [profile.quick]
                timeout = "250ms"
                bail = true
                manifest-window = "long"
            "#},
        );

        let config = HivetestConfig::from_sources(dir.path(), None).unwrap();
        let default = config.profile("default").unwrap();
        assert_eq!(default.workers(), WorkerCount::Count(3));
        assert_eq!(default.timeout(), Duration::from_secs(2));

        let quick = config.profile("quick").unwrap();
        assert_eq!(
            quick.run_options(),
            RunOptions {
                timeout: Duration::from_millis(250),
                bail: true,
                assertive: false,
                grep: None,
                ignore: None,
            }
        );
        assert_eq!(quick.workers(), WorkerCount::Count(3));
        assert_eq!(quick.manifest_window(), ManifestWindow::Long);
        assert_eq!(quick.store_dir().to_owned(), dir.path().join("cache/quick"));
    }

    #[test]
    fn unknown_profile() {
        let config = HivetestConfig::default_config("/base").unwrap();
        let err = config.profile("nightly").unwrap_err();
        assert_eq!(
            err.to_string(),
            "profile `nightly` not found (known profiles: ci, default)"
        );
    }

    #[test]
    fn invalid_config_reports_file() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            indoc! {r#"
                [profile.default]
                workers = 0
            "#},
        );
        let err = HivetestConfig::from_sources(dir.path(), None).unwrap_err();
        assert_eq!(err.config_file(), &dir.path().join(HivetestConfig::CONFIG_PATH));
    }
}
