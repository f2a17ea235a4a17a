//! Realized PnL per trade
//!
//! Reported PnL is used when the export has it. Otherwise PnL is derived
//! with the average-cost method per (market, outcome) position: buys add
//! shares and cost basis, sells realize proceeds minus the average cost of
//! the shares actually held.

use std::collections::HashMap;

use crate::types::{Side, Trade};

const DUST_SHARES: f64 = 1e-9;

#[derive(Debug, Default, Clone, Copy)]
struct Position {
    shares: f64,
    cost_basis: f64,
}

/// PnL contribution of each trade, in input order
///
/// `trades` must belong to a single wallet and be in canonical order so the
/// derived values do not depend on how the input file was sorted.
pub fn realized_pnl(trades: &[&Trade]) -> Vec<f64> {
    let mut positions: HashMap<(&str, Option<&str>), Position> = HashMap::new();

    trades
        .iter()
        .map(|trade| {
            let key = (trade.market.as_str(), trade.outcome.as_deref());
            let derived = match trade.side {
                Side::Buy => {
                    let pos = positions.entry(key).or_default();
                    pos.shares += trade.size;
                    pos.cost_basis += trade.notional();
                    0.0
                }
                Side::Sell => match positions.get_mut(&key) {
                    Some(pos) if pos.shares > DUST_SHARES => {
                        let sold = trade.size.min(pos.shares);
                        let avg_cost = pos.cost_basis / pos.shares;
                        let pnl = sold * trade.price - sold * avg_cost;

                        pos.shares -= sold;
                        pos.cost_basis = avg_cost * pos.shares;
                        if pos.shares <= DUST_SHARES {
                            positions.remove(&key);
                        }
                        pnl
                    }
                    // Selling shares we never saw bought (e.g. minted or
                    // bought before the export window) realizes nothing
                    _ => 0.0,
                },
            };
            trade.pnl.unwrap_or(derived)
        })
        .collect()
}
