//! Speaker-role resolution.
//!
//! Raw labels are resolved in three steps: the alias table, then role
//! keywords, then the raw label itself as an unresolved role. Resolution is
//! memoised per collection, so a label always maps to the same role within
//! one source document.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::helpers::collapse_whitespace;

static THERAPIST_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(DR\.?(\s|$)|DOCTOR\b)|\b(THERAPIST|COUNSEL+OR|INSTRUCTOR)\b").unwrap()
});
static CLIENT_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(CLIENT|PATIENT|RESPONDENT)\d*\b").unwrap());

/// Canonical speaker role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Therapist,
    Client,
    /// A label no rule recognised, kept verbatim.
    Unresolved(String),
}

impl Role {
    /// Persisted form: `therapist`, `client` or the raw label.
    pub fn as_str(&self) -> &str {
        match self {
            Role::Therapist => "therapist",
            Role::Client => "client",
            Role::Unresolved(label) => label,
        }
    }

    /// Form used when rendering example context lines.
    pub fn display_name(&self) -> &str {
        match self {
            Role::Therapist => "Therapist",
            Role::Client => "Client",
            Role::Unresolved(label) => label,
        }
    }

    pub fn is_therapist(&self) -> bool {
        matches!(self, Role::Therapist)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "therapist" => Role::Therapist,
            "client" => Role::Client,
            _ => Role::Unresolved(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Unresolved(label) => label,
            other => other.as_str().to_string(),
        }
    }
}

/// Role named by an alias-table entry.
///
/// Config files spell roles freely (`therapist`, `THERAPIST`, `Client`), so
/// parsing ignores case; anything other than the two roles is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AliasRole {
    Therapist,
    Client,
}

impl TryFrom<String> for AliasRole {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "therapist" => Ok(AliasRole::Therapist),
            "client" => Ok(AliasRole::Client),
            _ => Err(ConfigError::UnknownRole(value)),
        }
    }
}

impl From<AliasRole> for String {
    fn from(role: AliasRole) -> Self {
        Role::from(role).as_str().to_string()
    }
}

impl From<AliasRole> for Role {
    fn from(role: AliasRole) -> Self {
        match role {
            AliasRole::Therapist => Role::Therapist,
            AliasRole::Client => Role::Client,
        }
    }
}

/// Exact-match table from raw label to role.
///
/// Keys are normalised (uppercased, whitespace collapsed) on insertion and on
/// lookup, so `"Dr.  Felder"` and `"DR. FELDER"` are the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, AliasRole>", into = "BTreeMap<String, AliasRole>")]
pub struct AliasTable {
    entries: BTreeMap<String, AliasRole>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: &str, role: AliasRole) {
        self.entries.insert(normalize_label(label), role);
    }

    pub fn get(&self, label: &str) -> Option<Role> {
        self.entries.get(&normalize_label(label)).map(|&role| role.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<String, AliasRole>> for AliasTable {
    fn from(map: BTreeMap<String, AliasRole>) -> Self {
        let mut table = AliasTable::new();
        for (label, role) in map {
            table.insert(&label, role);
        }
        table
    }
}

impl From<AliasTable> for BTreeMap<String, AliasRole> {
    fn from(table: AliasTable) -> Self {
        table.entries
    }
}

impl<const N: usize> From<[(&str, AliasRole); N]> for AliasTable {
    fn from(pairs: [(&str, AliasRole); N]) -> Self {
        let mut table = AliasTable::new();
        for (label, role) in pairs {
            table.insert(label, role);
        }
        table
    }
}

fn normalize_label(label: &str) -> String {
    collapse_whitespace(label).to_uppercase()
}

/// Resolves raw speaker labels for one collection.
pub struct SpeakerResolver<'a> {
    aliases: &'a AliasTable,
    resolved: HashMap<String, Role>,
}

impl<'a> SpeakerResolver<'a> {
    pub fn new(aliases: &'a AliasTable) -> Self {
        Self {
            aliases,
            resolved: HashMap::new(),
        }
    }

    /// Map a raw label to its canonical role.
    pub fn resolve(&mut self, raw: &str) -> Role {
        let label = collapse_whitespace(raw);
        if let Some(role) = self.resolved.get(&label) {
            return role.clone();
        }
        let role = resolve_label(self.aliases, &label);
        self.resolved.insert(label, role.clone());
        role
    }
}

fn resolve_label(aliases: &AliasTable, label: &str) -> Role {
    if let Some(role) = aliases.get(label) {
        return role;
    }
    let upper = label.to_uppercase();
    if THERAPIST_KEYWORD_RE.is_match(&upper) {
        Role::Therapist
    } else if CLIENT_KEYWORD_RE.is_match(&upper) {
        Role::Client
    } else {
        Role::Unresolved(label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_table_wins_over_keywords() {
        let aliases = AliasTable::from([("DR. FELDER", AliasRole::Therapist), ("LORETTA", AliasRole::Client)]);
        let mut resolver = SpeakerResolver::new(&aliases);

        assert_eq!(resolver.resolve("LORETTA"), Role::Client);
        assert_eq!(resolver.resolve("Loretta"), Role::Client);
        assert_eq!(resolver.resolve("DR.  FELDER"), Role::Therapist);
    }

    #[test]
    fn test_keyword_fallback() {
        let aliases = AliasTable::new();
        let mut resolver = SpeakerResolver::new(&aliases);

        assert_eq!(resolver.resolve("THERAPIST"), Role::Therapist);
        assert_eq!(resolver.resolve("COUNSELOR"), Role::Therapist);
        assert_eq!(resolver.resolve("DR. ELLIS"), Role::Therapist);
        assert_eq!(resolver.resolve("CLIENT"), Role::Client);
        assert_eq!(resolver.resolve("FEMALE CLIENT"), Role::Client);
        assert_eq!(resolver.resolve("PATIENT"), Role::Client);
        assert_eq!(resolver.resolve("RESPONDENT"), Role::Client);
    }

    #[test]
    fn test_unknown_label_kept_verbatim_and_stable() {
        let aliases = AliasTable::new();
        let mut resolver = SpeakerResolver::new(&aliases);

        let first = resolver.resolve("MARGE");
        let second = resolver.resolve("MARGE");
        assert_eq!(first, Role::Unresolved("MARGE".to_string()));
        assert_eq!(first, second);
        // "DREW" must not be mistaken for a doctor title.
        assert_eq!(resolver.resolve("DREW"), Role::Unresolved("DREW".to_string()));
    }

    #[test]
    fn test_role_serializes_as_plain_string() {
        let json = serde_json::to_string(&vec![
            Role::Therapist,
            Role::Client,
            Role::Unresolved("MARGE".to_string()),
        ])
        .unwrap();
        assert_eq!(json, r#"["therapist","client","MARGE"]"#);

        let back: Vec<Role> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[2], Role::Unresolved("MARGE".to_string()));
    }

    #[test]
    fn test_alias_roles_ignore_case() {
        let aliases: AliasTable =
            toml::from_str("\"LORETTA\" = \"Client\"\n\"DR. FELDER\" = \"THERAPIST\"\n").unwrap();
        let mut resolver = SpeakerResolver::new(&aliases);

        assert_eq!(resolver.resolve("LORETTA"), Role::Client);
        assert_eq!(resolver.resolve("Dr. Felder"), Role::Therapist);
    }

    #[test]
    fn test_unknown_alias_role_rejected() {
        let err = toml::from_str::<AliasTable>("\"NURSE JOY\" = \"nurse\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown speaker role"));
        assert_eq!(
            AliasRole::try_from("nurse".to_string()),
            Err(ConfigError::UnknownRole("nurse".to_string()))
        );
    }

    #[test]
    fn test_alias_table_serializes_lowercase_roles() {
        let aliases = AliasTable::from([("Loretta", AliasRole::Client)]);
        let json = serde_json::to_string(&aliases).unwrap();
        assert_eq!(json, r#"{"LORETTA":"client"}"#);
    }
}
