//! Caller-facing options and the override layer derived from them.

use std::path::PathBuf;

use serde::Serialize;

pub const DEFAULT_PRIVATE_KEY_FILE: &str = "gam_creds.json";

/// Log verbosity after the quiet flag and `-v` count have been folded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    /// `quiet` wins over any number of `-v`.
    pub fn from_flags(quiet: bool, verbose_count: u8) -> Self {
        if quiet {
            return Verbosity::Quiet;
        }
        match verbose_count {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }

    pub fn level(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

/// Everything a caller (CLI or dashboard) supplies for one creation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub configfile: PathBuf,
    pub network_code: Option<i64>,
    pub network_name: Option<String>,
    pub private_key_file: PathBuf,
    pub template: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub single_order: bool,
    pub bidder_codes: Vec<String>,
    pub test_run: bool,
    pub dry_run: bool,
    pub verbosity: Verbosity,
    pub skip_auto_archive: bool,
    pub include_details: bool,
}

impl CreateOptions {
    pub fn new<P: Into<PathBuf>>(configfile: P) -> Self {
        Self {
            configfile: configfile.into(),
            network_code: None,
            network_name: None,
            private_key_file: PathBuf::from(DEFAULT_PRIVATE_KEY_FILE),
            template: None,
            settings: None,
            schema: None,
            single_order: false,
            bidder_codes: Vec::new(),
            test_run: false,
            dry_run: false,
            verbosity: Verbosity::default(),
            skip_auto_archive: false,
            include_details: false,
        }
    }

    /// Fold the raw `--quiet` flag and `-v` count into [`Verbosity`].
    pub fn with_verbosity(mut self, quiet: bool, verbose_count: u8) -> Self {
        self.verbosity = Verbosity::from_flags(quiet, verbose_count);
        self
    }

    pub fn quiet(&self) -> bool {
        self.verbosity == Verbosity::Quiet
    }

    /// The override layer. Unset or default-valued options stay `None` so the user
    /// document and built-in settings can still supply them.
    pub fn overrides(&self) -> RunOverrides {
        let flag = |value: bool| value.then_some(true);
        RunOverrides {
            network_code: self.network_code,
            network_name: self.network_name.clone(),
            private_key_file: Some(self.private_key_file.clone()),
            template: self.template.clone(),
            settings: self.settings.clone(),
            schema: self.schema.clone(),
            single_order: Some(self.single_order),
            bidder_codes: Some(self.bidder_codes.clone()),
            test_run: flag(self.test_run),
            dry_run: flag(self.dry_run),
            skip_auto_archive: flag(self.skip_auto_archive),
            include_details: flag(self.include_details),
            verbosity: (self.verbosity != Verbosity::default()).then_some(self.verbosity),
        }
    }
}

/// Highest-precedence configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub network_code: Option<i64>,
    pub network_name: Option<String>,
    pub private_key_file: Option<PathBuf>,
    pub template: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub single_order: Option<bool>,
    pub bidder_codes: Option<Vec<String>>,
    pub test_run: Option<bool>,
    pub dry_run: Option<bool>,
    pub skip_auto_archive: Option<bool>,
    pub include_details: Option<bool>,
    pub verbosity: Option<Verbosity>,
}

impl RunOverrides {
    pub fn is_empty(&self) -> bool {
        self.network_code.is_none()
            && self.network_name.is_none()
            && self.private_key_file.is_none()
            && self.template.is_none()
            && self.settings.is_none()
            && self.schema.is_none()
            && self.single_order.is_none()
            && self.bidder_codes.is_none()
            && self.test_run.is_none()
            && self.dry_run.is_none()
            && self.skip_auto_archive.is_none()
            && self.include_details.is_none()
            && self.verbosity.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_normalizes_once() {
        assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, 5), Verbosity::Trace);
        assert_eq!(Verbosity::from_flags(true, 3), Verbosity::Quiet);
        assert_eq!(Verbosity::Quiet.level(), "warn");
    }

    #[test]
    fn overrides_leave_unset_fields_open() {
        let options = CreateOptions::new("config.yml");
        let overrides = options.overrides();
        assert_eq!(overrides.network_code, None);
        assert_eq!(overrides.test_run, None);
        assert_eq!(overrides.verbosity, None);
        assert_eq!(
            overrides.private_key_file,
            Some(PathBuf::from(DEFAULT_PRIVATE_KEY_FILE))
        );
        assert!(!overrides.is_empty());
        assert!(RunOverrides::default().is_empty());
    }

    #[test]
    fn explicit_flags_become_overrides() {
        let mut options = CreateOptions::new("config.yml").with_verbosity(true, 2);
        options.test_run = true;
        options.network_code = Some(42);
        let overrides = options.overrides();
        assert_eq!(overrides.test_run, Some(true));
        assert_eq!(overrides.network_code, Some(42));
        assert_eq!(overrides.verbosity, Some(Verbosity::Quiet));
        assert!(options.quiet());

        let only_verbosity = RunOverrides {
            verbosity: Some(Verbosity::Trace),
            ..RunOverrides::default()
        };
        assert!(!only_verbosity.is_empty());
    }
}
