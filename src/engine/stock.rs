use ulid::Ulid;

use crate::model::*;

use super::txn::Txn;
use super::EngineError;

/// How much of a line is being given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The whole line: product quantity plus every addon.
    Full,
    /// Only this many units of the line product; addons stay consumed.
    Partial(u32),
}

/// Stock left for a product once this transaction's staged adjustments land.
/// `None` for untracked products.
fn projected_stock(txn: &Txn<'_>, product_id: Ulid) -> Option<i64> {
    let stock = txn.store().products.get(&product_id)?.stock?;
    let staged: i64 = txn
        .staged()
        .iter()
        .filter_map(|e| match e {
            Event::StockAdjusted { product_id: p, delta } if *p == product_id => Some(*delta),
            _ => None,
        })
        .sum();
    Some(stock as i64 + staged)
}

/// Stage a stock decrement. Untracked products always succeed.
pub(super) fn consume(txn: &mut Txn<'_>, product_id: Ulid, quantity: u32) -> Result<(), EngineError> {
    let Some(available) = projected_stock(txn, product_id) else {
        return Ok(());
    };
    if available < quantity as i64 {
        let name = txn.store().product(product_id)?.name.clone();
        return Err(EngineError::not_allowed(format!(
            "No hay existencias suficientes de {name}"
        )));
    }
    txn.stage(Event::StockAdjusted {
        product_id,
        delta: -(quantity as i64),
    });
    Ok(())
}

pub(super) fn release(txn: &mut Txn<'_>, product_id: Ulid, quantity: u32) {
    if quantity == 0 || projected_stock(txn, product_id).is_none() {
        return;
    }
    txn.stage(Event::StockAdjusted {
        product_id,
        delta: quantity as i64,
    });
}

/// Stage the stock a removed (or partially removed) line gives back.
pub(super) fn restore_line(txn: &mut Txn<'_>, line: &SelledProduct, removal: Removal) {
    match removal {
        Removal::Full => {
            release(txn, line.product_id, line.quantity);
            for addon in &line.addons {
                release(txn, addon.product_id, addon.quantity);
            }
        }
        Removal::Partial(quantity) => release(txn, line.product_id, quantity.min(line.quantity)),
    }
}

/// Stage the stock consumed by a freshly built line, addons included.
pub(super) fn consume_line(txn: &mut Txn<'_>, line: &SelledProduct) -> Result<(), EngineError> {
    consume(txn, line.product_id, line.quantity)?;
    for addon in &line.addons {
        consume(txn, addon.product_id, addon.quantity)?;
    }
    Ok(())
}
