use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Client label meaning "every client".
pub const ALL_CLIENTS: &str = "Todos";

/// Accent-stripped, trimmed, lowercased form used for every label comparison.
pub fn normalize_label(label: &str) -> String {
    label
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .trim()
        .to_lowercase()
}

/// Which client rows a query covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientFilter {
    All,
    Only(String),
}

impl ClientFilter {
    /// Empty labels and the wildcard label select every client.
    pub fn parse(label: &str, wildcard: &str) -> Self {
        let norm = normalize_label(label);
        if norm.is_empty() || norm == normalize_label(wildcard) {
            Self::All
        } else {
            Self::Only(norm)
        }
    }

    pub fn matches(&self, normalized_client: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(c) => c == normalized_client,
        }
    }
}

/// Identity of one product curve: (client, category, product).
///
/// Labels are kept as given for display; equality, ordering and hashing use
/// the normalized form, so `"Crédito"` and `" credito "` address the same key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "KeyLabels", into = "KeyLabels")]
pub struct CurveKey {
    client: String,
    category: String,
    product: String,
    normalized: String,
}

#[derive(Serialize, Deserialize)]
struct KeyLabels {
    client: String,
    category: String,
    product: String,
}

impl From<KeyLabels> for CurveKey {
    fn from(l: KeyLabels) -> Self {
        CurveKey::new(l.client, l.category, l.product)
    }
}

impl From<CurveKey> for KeyLabels {
    fn from(k: CurveKey) -> Self {
        KeyLabels {
            client: k.client,
            category: k.category,
            product: k.product,
        }
    }
}

impl CurveKey {
    pub fn new(
        client: impl Into<String>,
        category: impl Into<String>,
        product: impl Into<String>,
    ) -> Self {
        let client = client.into();
        let category = category.into();
        let product = product.into();
        let normalized = format!(
            "{}::{}::{}",
            normalize_label(&client),
            normalize_label(&category),
            normalize_label(&product)
        );
        Self {
            client,
            category,
            product,
            normalized,
        }
    }

    /// Key for a product across all clients.
    pub fn all_clients(category: impl Into<String>, product: impl Into<String>) -> Self {
        Self::new(ALL_CLIENTS, category, product)
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    /// Stable string identity, `client::category::product` in normalized form.
    pub fn storage_key(&self) -> &str {
        &self.normalized
    }

    pub fn client_filter(&self, wildcard: &str) -> ClientFilter {
        ClientFilter::parse(&self.client, wildcard)
    }

    pub fn matches_category(&self, normalized_category: &str) -> bool {
        normalize_label(&self.category) == normalized_category
    }

    pub fn matches_product(&self, normalized_product: &str) -> bool {
        normalize_label(&self.product) == normalized_product
    }
}

impl PartialEq for CurveKey {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for CurveKey {}

impl Hash for CurveKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl Ord for CurveKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl PartialOrd for CurveKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for CurveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CurveKey({})", self.normalized)
    }
}

impl fmt::Display for CurveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} / {}", self.client, self.category, self.product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_accents_and_case() {
        assert_eq!(normalize_label("  Captações "), "captacoes");
        assert_eq!(normalize_label("OPERAÇÕES CRÉDITO"), "operacoes credito");
        assert_eq!(normalize_label(""), "");
    }

    #[test]
    fn wildcard_and_empty_select_all_clients() {
        assert_eq!(ClientFilter::parse("Todos", ALL_CLIENTS), ClientFilter::All);
        assert_eq!(ClientFilter::parse("todos", ALL_CLIENTS), ClientFilter::All);
        assert_eq!(ClientFilter::parse("", ALL_CLIENTS), ClientFilter::All);
        let only = ClientFilter::parse("Varejo", ALL_CLIENTS);
        assert!(only.matches("varejo"));
        assert!(!only.matches("atacado"));
        assert!(ClientFilter::All.matches("anything"));
    }

    #[test]
    fn keys_compare_by_normalized_labels() {
        let a = CurveKey::new("Todos", "Crédito", "Empréstimo");
        let b = CurveKey::new("todos", " credito", "EMPRESTIMO");
        assert_eq!(a, b);
        assert_eq!(a.storage_key(), "todos::credito::emprestimo");
        assert_eq!(a.category(), "Crédito");
    }

    #[test]
    fn key_serializes_labels_only() -> Result<(), serde_json::Error> {
        let key = CurveKey::all_clients("Serviços", "Tarifa");
        let json = serde_json::to_string(&key)?;
        assert_eq!(json, r#"{"client":"Todos","category":"Serviços","product":"Tarifa"}"#);
        let back: CurveKey = serde_json::from_str(&json)?;
        assert_eq!(back, key);
        assert_eq!(back.storage_key(), key.storage_key());
        Ok(())
    }
}
