use super::ui;
use crate::core::CryptoCurrency;
use crate::resolver::SwapLimits;
use comfy_table::Cell;

fn format_coins(base_units: u64, crypto: CryptoCurrency) -> String {
    let decimals = crypto.base_units().ilog10() as usize;
    let coins = base_units as f64 / crypto.base_units() as f64;
    format!("{coins:.decimals$} {crypto}")
}

impl SwapLimits {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Limit"),
            ui::header_cell("USD"),
            ui::header_cell("NIM"),
            ui::header_cell("BTC"),
            ui::header_cell("EUR (first use)"),
        ]);

        let rows = [
            ("Current", self.current.usd, self.current.luna, self.current.sat),
            ("Monthly", self.monthly.usd, self.monthly.luna, self.monthly.sat),
            ("Remaining", self.remaining.usd, self.remaining.luna, self.remaining.sat),
        ];
        for (label, usd, luna, sat) in rows {
            let eur = if label == "Current" && self.current.eur.is_finite() {
                ui::amount_cell(format!("{:.2}", self.current.eur), self.current.eur <= 0.0)
            } else {
                ui::na_cell()
            };
            table.add_row(vec![
                Cell::new(label),
                ui::amount_cell(format!("{usd:.2}"), usd <= 0.0),
                ui::amount_cell(format_coins(luna, CryptoCurrency::Nim), luna == 0),
                ui::amount_cell(format_coins(sat, CryptoCurrency::Btc), sat == 0),
                eur,
            ]);
        }

        let mut output = format!("{}\n\n", ui::style_text("Swap limits", ui::StyleType::Title));
        output.push_str(&table.to_string());
        if self.current.usd <= 0.0 {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text("No swap volume available right now", ui::StyleType::Error)
            ));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{CurrentLimit, LimitAmount};

    #[test]
    fn test_format_coins() {
        assert_eq!(format_coins(123_456_789, CryptoCurrency::Nim), "1234.56789 NIM");
        assert_eq!(format_coins(50_000, CryptoCurrency::Btc), "0.00050000 BTC");
    }

    #[test]
    fn test_table_contains_figures() {
        let limits = SwapLimits {
            current: CurrentLimit {
                usd: 50.0,
                luna: 200,
                sat: 100,
                eur: 60.0,
            },
            monthly: LimitAmount {
                usd: 200.0,
                luna: 800,
                sat: 400,
            },
            remaining: LimitAmount {
                usd: 150.0,
                luna: 600,
                sat: 300,
            },
        };

        let output = limits.display_as_table();
        assert!(output.contains("50.00"));
        assert!(output.contains("200.00"));
        assert!(output.contains("0.00800 NIM"));
        assert!(output.contains("60.00"));
        assert!(!output.contains("No swap volume"));
    }
}
