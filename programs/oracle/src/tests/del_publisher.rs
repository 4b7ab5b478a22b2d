use solana_program::pubkey::Pubkey;

use crate::state::{AccKey, PriceInfo, Symbol, PTYPE_PRICE, STATUS_TRADING};
use crate::tests::{do_add_publisher, do_add_symbol, do_del_publisher, do_init_mapping, Acct};

fn roster(sym: Symbol, n: usize) -> (Acct, Acct, Vec<Pubkey>) {
    let mut funder = Acct::funding();
    let mut map = Acct::mapping();
    let mut price = Acct::price();
    do_init_mapping(&mut funder, &mut map).unwrap();
    do_add_symbol(&mut funder, &mut map, &mut price, sym, -4, PTYPE_PRICE).unwrap();
    let keys: Vec<Pubkey> = (0..n).map(|_| Pubkey::new_unique()).collect();
    for key in &keys {
        do_add_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, key).unwrap();
    }
    (funder, price, keys)
}

#[test]
fn removes_and_shifts() {
    let sym = Symbol::from_str("ADA/USD");
    let (mut funder, mut price, keys) = roster(sym, 4);

    // Give each component a distinguishable quote so the shift is visible.
    for (i, comp) in price.price_acct_mut().comp[..4].iter_mut().enumerate() {
        comp.latest = PriceInfo {
            price: 100 + i as i64,
            conf: 1,
            status: STATUS_TRADING,
            unused: 0,
            pub_slot: 7,
        };
    }

    do_del_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &keys[1]).unwrap();

    let acct = price.price_acct();
    assert_eq!(acct.num, 3);
    assert_eq!(acct.comp[0].publisher, AccKey::from_pubkey(&keys[0]));
    assert_eq!(acct.comp[1].publisher, AccKey::from_pubkey(&keys[2]));
    assert_eq!(acct.comp[2].publisher, AccKey::from_pubkey(&keys[3]));
    assert_eq!(acct.comp[1].latest.price, 102);
    assert_eq!(acct.comp[2].latest.price, 103);
    // Vacated tail slot is zeroed.
    assert!(acct.comp[3].publisher.is_zero());
    assert_eq!(acct.comp[3].latest, Default::default());
}

#[test]
fn add_then_del_round_trips() {
    let sym = Symbol::from_str("ADA/USD");
    let (mut funder, mut price, _) = roster(sym, 0);
    let key = Pubkey::new_unique();

    do_add_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &key).unwrap();
    do_del_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &key).unwrap();

    let acct = price.price_acct();
    assert_eq!(acct.num, 0);
    assert!(acct.comp[0].publisher.is_zero());
}

#[test]
fn rejects_unknown_publisher() {
    let sym = Symbol::from_str("ADA/USD");
    let (mut funder, mut price, _) = roster(sym, 2);

    let stranger = Pubkey::new_unique();
    assert!(do_del_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &stranger).is_err());
    assert_eq!(price.price_acct().num, 2);
}
