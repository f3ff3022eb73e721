use serde::{Deserialize, Deserializer, Serialize};

use crate::key::normalize_label;
use crate::series::coerce;

/// One cleaned upload row: a single (client, category, product, month, year)
/// cell with its realized and projected values.
///
/// Decoding is lenient. Metrics that are missing or cannot be read as numbers
/// become 0.0; an unreadable month or year becomes 0 and a missing label
/// becomes empty. Rows with a bad month or year or a blank category or
/// product are later excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(default, deserialize_with = "lenient_label")]
    pub client: String,
    #[serde(default, deserialize_with = "lenient_label")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_label")]
    pub product: String,
    #[serde(default, deserialize_with = "lenient_month")]
    pub month: u8,
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: i32,
    #[serde(default, deserialize_with = "lenient_metric")]
    pub realized: f64,
    #[serde(default, deserialize_with = "lenient_metric")]
    pub analytic: f64,
    #[serde(default, deserialize_with = "lenient_metric")]
    pub market: f64,
    /// `None` means the upload carried no adjusted value; analytic stands in.
    #[serde(default, deserialize_with = "lenient_optional_metric")]
    pub adjusted: Option<f64>,
}

impl RawRow {
    pub fn new(
        client: impl Into<String>,
        category: impl Into<String>,
        product: impl Into<String>,
        month: u8,
        year: i32,
    ) -> Self {
        Self {
            client: client.into(),
            category: category.into(),
            product: product.into(),
            month,
            year,
            realized: 0.0,
            analytic: 0.0,
            market: 0.0,
            adjusted: None,
        }
    }

    pub fn with_realized(mut self, value: f64) -> Self {
        self.realized = value;
        self
    }

    pub fn with_analytic(mut self, value: f64) -> Self {
        self.analytic = value;
        self
    }

    pub fn with_market(mut self, value: f64) -> Self {
        self.market = value;
        self
    }

    pub fn with_adjusted(mut self, value: f64) -> Self {
        self.adjusted = Some(value);
        self
    }

    /// Adjusted value used by every aggregate.
    pub fn effective_adjusted(&self) -> f64 {
        coerce(Some(self.adjusted.unwrap_or(self.analytic)))
    }

    pub fn has_valid_month(&self) -> bool {
        (1..=12).contains(&self.month)
    }

    pub fn normalized_client(&self) -> String {
        normalize_label(&self.client)
    }

    pub fn normalized_category(&self) -> String {
        normalize_label(&self.category)
    }

    pub fn normalized_product(&self) -> String {
        normalize_label(&self.product)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

fn read_cell<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Cell>, D::Error> {
    Option::<Cell>::deserialize(deserializer)
}

fn lenient_label<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match read_cell(deserializer)? {
        Some(Cell::Text(s)) => s,
        Some(Cell::Int(n)) => n.to_string(),
        Some(Cell::Float(f)) => f.to_string(),
        Some(Cell::Bool(_)) | None => String::new(),
    })
}

fn lenient_metric<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(read_cell(deserializer)?.and_then(cell_number).map_or(0.0, |v| coerce(Some(v))))
}

fn lenient_optional_metric<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<f64>, D::Error> {
    Ok(read_cell(deserializer)?
        .and_then(cell_number)
        .filter(|v| v.is_finite()))
}

fn lenient_month<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    Ok(match read_cell(deserializer)? {
        Some(Cell::Int(n)) => u8::try_from(n).ok().filter(|m| (1..=12).contains(m)),
        Some(Cell::Float(f)) if f.fract() == 0.0 => {
            Some(f as i64).and_then(|n| u8::try_from(n).ok()).filter(|m| (1..=12).contains(m))
        }
        Some(Cell::Text(s)) => parse_month(&s),
        _ => None,
    }
    .unwrap_or(0))
}

fn lenient_year<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    Ok(read_cell(deserializer)?
        .and_then(cell_number)
        .filter(|v| v.is_finite() && v.fract() == 0.0)
        .map_or(0, |v| v as i32))
}

fn cell_number(cell: Cell) -> Option<f64> {
    match cell {
        Cell::Int(n) => Some(n as f64),
        Cell::Float(f) => Some(f),
        Cell::Text(s) => parse_number(&s),
        Cell::Bool(_) => None,
    }
}

const MONTH_PREFIXES: [&str; 12] = [
    "jan", "fev", "mar", "abr", "mai", "jun", "jul", "ago", "set", "out", "nov", "dez",
];

/// Reads a calendar month from `"3"`, `"03"`, `"mar"`, `"Março"` or `"MAR/24"`.
pub fn parse_month(text: &str) -> Option<u8> {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<u8>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let norm = normalize_label(trimmed);
    let prefix: String = norm.chars().take(3).collect();
    MONTH_PREFIXES
        .iter()
        .position(|p| *p == prefix)
        .map(|i| i as u8 + 1)
}

/// Reads plain numbers (`"1234.5"`) and Brazilian currency strings
/// (`"R$ 1.234,56"`). Without a comma, dots are thousands separators only
/// when they split the digits into groups of three (`"1.234"`, `"1.000.000"`).
/// Returns `None` for anything else.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let cleaned = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else if is_dot_grouped(&cleaned) {
        cleaned.replace('.', "")
    } else {
        cleaned
    };
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `-?[1-9]d{0,2}(.ddd)+`
fn is_dot_grouped(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let groups: Vec<&str> = digits.split('.').collect();
    let all_digits = |g: &str| !g.is_empty() && g.bytes().all(|b| b.is_ascii_digit());
    groups.len() > 1
        && groups[0].len() <= 3
        && !groups[0].starts_with('0')
        && all_digits(groups[0])
        && groups[1..].iter().all(|g| g.len() == 3 && all_digits(g))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_month_labels() {
        assert_eq!(parse_month("3"), Some(3));
        assert_eq!(parse_month("12"), Some(12));
        assert_eq!(parse_month("13"), None);
        assert_eq!(parse_month("Março"), Some(3));
        assert_eq!(parse_month("fevereiro"), Some(2));
        assert_eq!(parse_month("DEZ/24"), Some(12));
        assert_eq!(parse_month("abc"), None);
    }

    #[test]
    fn parses_currency_strings() {
        assert_eq!(parse_number("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_number("1234.5"), Some(1234.5));
        assert_eq!(parse_number("R$ 1.000.000"), Some(1_000_000.0));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn dots_group_thousands_only_in_groups_of_three() {
        assert_eq!(parse_number("1.234"), Some(1234.0));
        assert_eq!(parse_number("-12.500"), Some(-12500.0));
        assert_eq!(parse_number("R$ 3.000"), Some(3000.0));
        assert_eq!(parse_number("1.5"), Some(1.5));
        assert_eq!(parse_number("0.125"), Some(0.125));
        assert_eq!(parse_number("1234.567"), Some(1234.567));
        assert_eq!(parse_number("1.2345"), Some(1.2345));
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
    }

    #[test]
    fn lenient_decoding_never_fails_on_bad_cells() -> Result<(), serde_json::Error> {
        let row: RawRow = serde_json::from_str(
            r#"{"client":"Varejo","category":"Crédito","product":"Cartão",
                "month":"jan","year":"2024","realized":"R$ 10,50",
                "analytic":null,"market":"n/a","adjusted":"oops"}"#,
        )?;
        assert_eq!(row.month, 1);
        assert_eq!(row.year, 2024);
        assert_eq!(row.realized, 10.5);
        assert_eq!(row.analytic, 0.0);
        assert_eq!(row.market, 0.0);
        assert_eq!(row.adjusted, None);
        Ok(())
    }

    #[test]
    fn missing_columns_default() -> Result<(), serde_json::Error> {
        let row: RawRow =
            serde_json::from_str(r#"{"category":"C","product":"P","month":14,"analytic":5}"#)?;
        assert_eq!(row.client, "");
        assert_eq!(row.month, 0);
        assert!(!row.has_valid_month());
        assert_eq!(row.year, 0);
        assert_eq!(row.effective_adjusted(), 5.0);
        Ok(())
    }

    #[test]
    fn odd_label_cells_decode_as_text() -> Result<(), serde_json::Error> {
        let rows: Vec<RawRow> = serde_json::from_str(
            r#"[{"client":null,"category":"C","product":42,"month":1,"year":2024},
                {"client":"a","month":2,"year":2024,"analytic":7},
                {"client":true,"category":1.5,"product":"P","month":3,"year":2024}]"#,
        )?;
        assert_eq!(rows.len(), 3);
        assert_eq!((rows[0].client.as_str(), rows[0].product.as_str()), ("", "42"));
        assert_eq!((rows[1].category.as_str(), rows[1].product.as_str()), ("", ""));
        assert_eq!(rows[1].analytic, 7.0);
        assert_eq!((rows[2].client.as_str(), rows[2].category.as_str()), ("", "1.5"));
        Ok(())
    }

    #[test]
    fn adjusted_overrides_analytic_when_present() {
        let row = RawRow::new("c", "C", "P", 1, 2024)
            .with_analytic(10.0)
            .with_adjusted(12.0);
        assert_eq!(row.effective_adjusted(), 12.0);
    }
}
