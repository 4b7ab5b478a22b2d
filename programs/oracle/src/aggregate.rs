//! Slot-boundary aggregation.

use crate::state::{AccKey, PriceAccount, COMP_SIZE, STATUS_TRADING, STATUS_UNKNOWN};

/// Recompute the aggregate price for a new slot.
///
/// No-op unless `slot` strictly advances past `curr_slot`. On advance the
/// window shifts: the previous accumulating slot becomes the valid slot, the
/// caller becomes the attributed publisher, and every component's latest
/// quote is snapshotted. Only snapshots marked TRADING and published exactly
/// one slot ago enter the median; a stale quote stays in `latest` but does
/// not contribute.
pub fn update(price: &mut PriceAccount, publisher: &AccKey, slot: u64) {
    if slot <= price.curr_slot {
        return;
    }

    price.agg.pub_slot = slot;
    price.valid_slot = price.curr_slot;
    price.curr_slot = slot;
    price.agg_pub = *publisher;

    // Permutation of contributing component indices, insertion-sorted
    // ascending by snapshot price. Ties keep insertion order.
    let mut numa = 0usize;
    let mut aidx = [0usize; COMP_SIZE];
    for i in 0..price.num as usize {
        let snap = price.comp[i].latest;
        price.comp[i].agg = snap;
        if snap.status == STATUS_TRADING && snap.pub_slot == slot - 1 {
            let mut j = numa;
            numa += 1;
            while j > 0 && price.comp[aidx[j - 1]].agg.price > snap.price {
                aidx[j] = aidx[j - 1];
                j -= 1;
            }
            aidx[j] = i;
        }
    }

    if numa == 0 {
        // Price and confidence are deliberately left as-is; readers must
        // gate on status.
        price.agg.status = STATUS_UNKNOWN;
        return;
    }

    let midx = numa / 2;
    let mid = price.comp[aidx[midx]].agg;
    let mut apx = mid.price;
    let mut acf = mid.conf;
    if midx > 0 && numa % 2 == 0 {
        let lo = price.comp[aidx[midx - 1]].agg;
        apx = (apx + lo.price) / 2;
        acf = (acf + lo.conf) / 2;
    }
    price.agg.price = apx;
    price.agg.conf = acf;
    price.agg.status = STATUS_TRADING;
}
