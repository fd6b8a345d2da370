//! Engine family routing.
//!
//! A client connects to `/{route_prefix}-{variant}`. The prefix picks an
//! [`EngineFamily`]; the variant (a version, Elo rating, personality name...)
//! is substituted into the family's program, argument and handshake
//! templates wherever `{variant}` appears.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the route variant in every template.
pub const VARIANT_PLACEHOLDER: &str = "{variant}";

/// Longest variant accepted from a route.
pub const MAX_VARIANT_LEN: usize = 64;

/// How to launch and warm up one family of engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineFamily {
    /// Category label for session counters.
    pub name: String,
    /// Label shown on the status page.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Route prefix; the full route is `{route_prefix}-{variant}`.
    pub route_prefix: String,
    /// Executable path template.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Delay before the handshake commands are sent.
    #[serde(default)]
    pub startup_delay_ms: u64,
    /// Wait for `readyok` before sending the handshake commands.
    #[serde(default)]
    pub wait_ready: bool,
    /// Command templates sent once before the session goes live.
    #[serde(default)]
    pub handshake: Vec<String>,
}

impl EngineFamily {
    /// Create a family with no arguments and no handshake.
    pub fn new(
        name: impl Into<String>,
        route_prefix: impl Into<String>,
        program: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            route_prefix: route_prefix.into(),
            program: program.into(),
            args: Vec::new(),
            startup_delay_ms: 0,
            wait_ready: false,
            handshake: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_startup_delay_ms(mut self, delay_ms: u64) -> Self {
        self.startup_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub const fn with_wait_ready(mut self, wait_ready: bool) -> Self {
        self.wait_ready = wait_ready;
        self
    }

    #[must_use]
    pub fn with_handshake<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handshake = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Status page label, falling back to the category name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Expand all templates for `variant`.
    pub fn resolve(&self, variant: &str) -> Result<ResolvedRoute, RouteError> {
        validate_variant(variant)?;
        let expand = |template: &str| template.replace(VARIANT_PLACEHOLDER, variant);
        Ok(ResolvedRoute {
            category: self.name.clone(),
            variant: variant.to_string(),
            program: PathBuf::from(expand(&self.program)),
            args: self.args.iter().map(|a| expand(a)).collect(),
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            wait_ready: self.wait_ready,
            handshake: self.handshake.iter().map(|c| expand(c)).collect(),
        })
    }
}

/// A route with every template expanded, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub category: String,
    pub variant: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub startup_delay: Duration,
    pub wait_ready: bool,
    pub handshake: Vec<String>,
}

/// Route resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("No engine family serves route {route:?}")]
    UnknownRoute { route: String },

    #[error("Invalid route variant {variant:?}: {reason}")]
    InvalidVariant { variant: String, reason: &'static str },
}

/// Lookup table from route to engine family.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    families: Vec<EngineFamily>,
}

impl RouteTable {
    pub const fn new(families: Vec<EngineFamily>) -> Self {
        Self { families }
    }

    pub fn families(&self) -> &[EngineFamily] {
        &self.families
    }

    /// Resolve a full route segment such as `stockfish-17`.
    ///
    /// When several prefixes match, the longest one wins so that
    /// `rodent3-...` is not claimed by a hypothetical `rodent` family.
    pub fn resolve(&self, route: &str) -> Result<ResolvedRoute, RouteError> {
        let (family, variant) = self
            .families
            .iter()
            .filter_map(|family| {
                route
                    .strip_prefix(family.route_prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .map(|variant| (family, variant))
            })
            .max_by_key(|(family, _)| family.route_prefix.len())
            .ok_or_else(|| RouteError::UnknownRoute {
                route: route.to_string(),
            })?;
        family.resolve(variant)
    }
}

fn validate_variant(variant: &str) -> Result<(), RouteError> {
    let invalid = |reason| RouteError::InvalidVariant {
        variant: variant.to_string(),
        reason,
    };
    if variant.is_empty() {
        return Err(invalid("empty"));
    }
    if variant.len() > MAX_VARIANT_LEN {
        return Err(invalid("too long"));
    }
    if variant.contains("..") {
        return Err(invalid("contains '..'"));
    }
    if !variant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("unsupported character"));
    }
    Ok(())
}

/// Engine families served out of the box.
pub fn default_families() -> Vec<EngineFamily> {
    vec![
        EngineFamily::new(
            "stockfish",
            "stockfish",
            "./engines/stockfish/stockfish-{variant}-uci",
        )
        .with_display_name("Stockfish"),
        EngineFamily::new("rodent", "rodent3", "./engines/RodentIII/rodentIII-debug")
            .with_display_name("Rodent-III")
            .with_startup_delay_ms(1000)
            .with_handshake(["setoption name PersonalityFile value {variant}.txt"]),
        EngineFamily::new("patricia", "patricia", "./engines/Patricia/patricia")
            .with_display_name("Patricia")
            .with_startup_delay_ms(500)
            .with_handshake([
                "setoption name UCI_Elo value {variant}",
                "setoption name MultiPV value 3",
            ]),
        EngineFamily::new("maia", "maia", "./engines/maia/maia-{variant}/lc0")
            .with_display_name("Maia")
            .with_args(["--backend=trivial"]),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(default_families())
    }

    #[test]
    fn resolves_stockfish_version_into_program_path() {
        let route = table().resolve("stockfish-17").unwrap();
        assert_eq!(route.category, "stockfish");
        assert_eq!(
            route.program,
            PathBuf::from("./engines/stockfish/stockfish-17-uci")
        );
        assert!(route.args.is_empty());
        assert!(route.handshake.is_empty());
        assert_eq!(route.startup_delay, Duration::ZERO);
    }

    #[test]
    fn resolves_patricia_handshake_templates() {
        let route = table().resolve("patricia-1500").unwrap();
        assert_eq!(
            route.handshake,
            vec![
                "setoption name UCI_Elo value 1500".to_string(),
                "setoption name MultiPV value 3".to_string(),
            ]
        );
        assert_eq!(route.startup_delay, Duration::from_millis(500));
    }

    #[test]
    fn maia_keeps_static_args() {
        let route = table().resolve("maia-1900").unwrap();
        assert_eq!(route.program, PathBuf::from("./engines/maia/maia-1900/lc0"));
        assert_eq!(route.args, vec!["--backend=trivial".to_string()]);
    }

    #[test]
    fn rodent_prefix_differs_from_category() {
        let route = table().resolve("rodent3-karpov").unwrap();
        assert_eq!(route.category, "rodent");
        assert_eq!(
            route.handshake,
            vec!["setoption name PersonalityFile value karpov.txt".to_string()]
        );
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::new(vec![
            EngineFamily::new("short", "sf", "/bin/short"),
            EngineFamily::new("long", "sf-dev", "/bin/long-{variant}"),
        ]);
        let route = table.resolve("sf-dev-3").unwrap();
        assert_eq!(route.category, "long");
        assert_eq!(route.program, PathBuf::from("/bin/long-3"));
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        let err = table().resolve("leela-1").unwrap_err();
        assert!(matches!(err, RouteError::UnknownRoute { .. }));
    }

    #[test]
    fn missing_variant_is_rejected() {
        assert!(matches!(
            table().resolve("stockfish-").unwrap_err(),
            RouteError::InvalidVariant { .. }
        ));
        assert!(matches!(
            table().resolve("stockfish").unwrap_err(),
            RouteError::UnknownRoute { .. }
        ));
    }

    #[test]
    fn path_traversal_variant_is_rejected() {
        for variant in ["..", "a..b", "a/b", "a b", "x\0"] {
            let err = table().resolve(&format!("stockfish-{variant}")).unwrap_err();
            assert!(
                matches!(err, RouteError::InvalidVariant { .. }),
                "variant {variant:?} should be rejected"
            );
        }
    }

    #[test]
    fn overlong_variant_is_rejected() {
        let variant = "1".repeat(MAX_VARIANT_LEN + 1);
        assert!(table().resolve(&format!("maia-{variant}")).is_err());
    }

    #[test]
    fn family_deserializes_with_defaults() {
        let family: EngineFamily = serde_json::from_str(
            r#"{"name": "toy", "route_prefix": "toy", "program": "/usr/bin/toy"}"#,
        )
        .unwrap();
        assert!(family.args.is_empty());
        assert!(!family.wait_ready);
        assert_eq!(family.label(), "toy");
    }
}
