use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use curvesim_core::RawRow;

pub const SAMPLE_CLIENTS: [&str; 2] = ["Varejo", "Atacado"];

pub const SAMPLE_CATALOG: [(&str, [&str; 3]); 3] = [
    ("Crédito", ["Cartão", "Consignado", "Imobiliário"]),
    ("Captação", ["Poupança", "CDB", "LCI"]),
    ("Serviços", ["Tarifas", "Seguros", "Consórcio"]),
];

/// Last month with realized values in the latest sample year.
pub const SAMPLE_REALIZED_THROUGH: u8 = 9;

/// Shorthand for a row with only the analytic value set.
pub fn row(client: &str, category: &str, product: &str, month: u8, year: i32, analytic: f64) -> RawRow {
    RawRow::new(client, category, product, month, year).with_analytic(analytic)
}

/// Deterministic dataset: every catalog product for each sample client,
/// twelve months of 2023 and 2024. Realized values of 2024 stop after
/// [`SAMPLE_REALIZED_THROUGH`]; no row carries an adjusted value.
pub fn sample_rows(seed: u64) -> Vec<RawRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::new();
    for year in [2023, 2024] {
        for client in SAMPLE_CLIENTS {
            for (category, products) in SAMPLE_CATALOG {
                for product in products {
                    let level: f64 = rng.gen_range(100.0..1000.0);
                    for month in 1..=12u8 {
                        let analytic = (level * rng.gen_range(0.9..1.1)).round();
                        let market = (analytic * rng.gen_range(0.8..1.2)).round();
                        let realized = if year == 2024 && month > SAMPLE_REALIZED_THROUGH {
                            0.0
                        } else {
                            (analytic * rng.gen_range(0.7..1.3)).round()
                        };
                        rows.push(
                            RawRow::new(client, category, product, month, year)
                                .with_analytic(analytic)
                                .with_market(market)
                                .with_realized(realized),
                        );
                    }
                }
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_deterministic_per_seed() {
        let a = sample_rows(7);
        assert_eq!(a, sample_rows(7));
        assert_ne!(a, sample_rows(8));
        assert_eq!(a.len(), 2 * 2 * 3 * 3 * 12);
        assert!(a.iter().all(|r| r.adjusted.is_none() && r.analytic > 0.0));
    }
}
