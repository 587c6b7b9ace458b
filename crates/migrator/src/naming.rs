use serde::{Deserialize, Serialize};

/// Suffix the clone files carry after the (destination) base name
pub const CLONE_MARKER: &str = " Clone";

/// How source file names relate to their clone and target counterparts.
///
/// Source files may carry an environment token (`dev_Invoices.fmp12`,
/// `Invoices_dev.fmp12`) that is stripped to get the base name; the clone and
/// target names then re-apply the destination token in the same position.
/// Either token may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NamingConvention {
    #[default]
    None,
    Prefix {
        #[serde(default)]
        source: String,
        #[serde(default)]
        clone: String,
    },
    Suffix {
        #[serde(default)]
        source: String,
        #[serde(default)]
        clone: String,
    },
}

impl NamingConvention {
    /// Derive the base name from a source file name.
    ///
    /// Returns `None` when the file does not have the expected extension or
    /// does not carry the configured source token. Matching is ASCII
    /// case-insensitive for both the extension and the token.
    pub fn source_base_name(&self, file_name: &str, extension: &str) -> Option<String> {
        let stem = strip_suffix_ignore_case(file_name, &format!(".{}", extension))?;

        let base = match self {
            NamingConvention::None => stem,
            NamingConvention::Prefix { source, .. } => strip_prefix_ignore_case(stem, source)?,
            NamingConvention::Suffix { source, .. } => strip_suffix_ignore_case(stem, source)?,
        };

        if base.is_empty() {
            None
        } else {
            Some(base.to_string())
        }
    }

    /// Re-apply the destination token to a base name
    pub fn destination_base_name(&self, base: &str) -> String {
        match self {
            NamingConvention::None => base.to_string(),
            NamingConvention::Prefix { clone, .. } => format!("{}{}", clone, base),
            NamingConvention::Suffix { clone, .. } => format!("{}{}", base, clone),
        }
    }

    /// File name of the clone a base name maps to, e.g. `Invoices Clone.fmp12`
    pub fn clone_file_name(&self, base: &str, extension: &str) -> String {
        format!("{}{}.{}", self.destination_base_name(base), CLONE_MARKER, extension)
    }

    /// File name of the migrated output, e.g. `Invoices.fmp12`
    pub fn target_file_name(&self, base: &str, extension: &str) -> String {
        format!("{}.{}", self.destination_base_name(base), extension)
    }

    /// Human readable pattern of the source files this convention accepts
    pub fn source_pattern(&self, extension: &str) -> String {
        match self {
            NamingConvention::Prefix { source, .. } if !source.is_empty() => {
                format!("{}*.{}", source, extension)
            }
            NamingConvention::Suffix { source, .. } if !source.is_empty() => {
                format!("*{}.{}", source, extension)
            }
            _ => format!("*.{}", extension),
        }
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(s);
    }
    if s.len() < prefix.len() || !s.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, tail) = s.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(tail)
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    if suffix.is_empty() {
        return Some(s);
    }
    if s.len() < suffix.len() {
        return None;
    }
    let split = s.len() - suffix.len();
    if !s.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = s.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn prefix(source: &str, clone: &str) -> NamingConvention {
        NamingConvention::Prefix { source: source.to_string(), clone: clone.to_string() }
    }

    fn suffix(source: &str, clone: &str) -> NamingConvention {
        NamingConvention::Suffix { source: source.to_string(), clone: clone.to_string() }
    }

    #[test]
    fn test_no_convention() {
        let naming = NamingConvention::None;
        assert_eq!(naming.source_base_name("Invoices.fmp12", "fmp12").as_deref(), Some("Invoices"));
        assert_eq!(naming.source_base_name("Invoices.FMP12", "fmp12").as_deref(), Some("Invoices"));
        assert_eq!(naming.source_base_name("Invoices.fp7", "fmp12"), None);
        assert_eq!(naming.source_base_name(".fmp12", "fmp12"), None);
        assert_eq!(naming.clone_file_name("Invoices", "fmp12"), "Invoices Clone.fmp12");
        assert_eq!(naming.target_file_name("Invoices", "fmp12"), "Invoices.fmp12");
    }

    #[test]
    fn test_prefix_convention() {
        let naming = prefix("dev_", "prod_");
        assert_eq!(naming.source_base_name("dev_Invoices.fmp12", "fmp12").as_deref(), Some("Invoices"));
        assert_eq!(naming.source_base_name("DEV_Invoices.fmp12", "fmp12").as_deref(), Some("Invoices"));
        assert_eq!(naming.source_base_name("Invoices.fmp12", "fmp12"), None);
        assert_eq!(naming.clone_file_name("Invoices", "fmp12"), "prod_Invoices Clone.fmp12");
        assert_eq!(naming.target_file_name("Invoices", "fmp12"), "prod_Invoices.fmp12");
        assert_eq!(naming.source_pattern("fmp12"), "dev_*.fmp12");
    }

    #[test]
    fn test_suffix_convention_with_empty_clone_token() {
        let naming = suffix("_uat", "");
        assert_eq!(naming.source_base_name("Invoices_uat.fmp12", "fmp12").as_deref(), Some("Invoices"));
        assert_eq!(naming.source_base_name("Invoices.fmp12", "fmp12"), None);
        assert_eq!(naming.clone_file_name("Invoices", "fmp12"), "Invoices Clone.fmp12");
        assert_eq!(naming.source_pattern("fmp12"), "*_uat.fmp12");
    }

    #[test]
    fn test_empty_source_token_accepts_everything() {
        let naming = prefix("", "prod_");
        assert_eq!(naming.source_base_name("Invoices.fmp12", "fmp12").as_deref(), Some("Invoices"));
        assert_eq!(naming.source_pattern("fmp12"), "*.fmp12");
    }

    #[test]
    fn test_multibyte_names_do_not_panic() {
        let naming = suffix("é", "");
        assert_eq!(naming.source_base_name("Café.fmp12", "fmp12").as_deref(), Some("Caf"));
        assert_eq!(naming.source_base_name("日本.fmp12", "fmp12"), None);
    }

    proptest! {
        #[test]
        fn test_token_is_stripped_for_any_base(
            base in "[A-Za-z0-9 ]{1,20}",
            token in "[a-z_]{0,5}",
            use_prefix in prop::bool::ANY,
        ) {
            let (naming, file) = if use_prefix {
                (prefix(&token, "x_"), format!("{}{}.fmp12", token, base))
            } else {
                (suffix(&token, "_x"), format!("{}{}.fmp12", base, token))
            };
            prop_assert_eq!(naming.source_base_name(&file, "fmp12"), Some(base.clone()));

            let target = naming.target_file_name(&base, "fmp12");
            prop_assert!(target.contains(&base));
            prop_assert!(target.ends_with(".fmp12"));
        }
    }
}
