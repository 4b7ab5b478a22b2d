use solana_program::pubkey::Pubkey;

use crate::state::{AccKey, Symbol, COMP_SIZE, PTYPE_PRICE, PTYPE_TWAP};
use crate::tests::{do_add_publisher, do_add_symbol, do_init_mapping, Acct};

fn price_with_symbol(sym: Symbol) -> (Acct, Acct) {
    let mut funder = Acct::funding();
    let mut map = Acct::mapping();
    let mut price = Acct::price();
    do_init_mapping(&mut funder, &mut map).unwrap();
    do_add_symbol(&mut funder, &mut map, &mut price, sym, -4, PTYPE_PRICE).unwrap();
    (funder, price)
}

#[test]
fn adds_publisher() {
    let sym = Symbol::from_str("ETH/USD");
    let (mut funder, mut price) = price_with_symbol(sym);
    let key = Pubkey::new_unique();

    do_add_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &key).unwrap();

    let acct = price.price_acct();
    assert_eq!(acct.num, 1);
    assert_eq!(acct.comp[0].publisher, AccKey::from_pubkey(&key));
    assert_eq!(acct.comp[0].latest, Default::default());
    assert_eq!(acct.comp[0].agg, Default::default());
}

#[test]
fn keeps_roster_distinct() {
    let sym = Symbol::from_str("ETH/USD");
    let (mut funder, mut price) = price_with_symbol(sym);
    let key = Pubkey::new_unique();

    do_add_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &key).unwrap();
    assert!(do_add_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &key).is_err());
    assert_eq!(price.price_acct().num, 1);
}

#[test]
fn rejects_full_roster() {
    let sym = Symbol::from_str("ETH/USD");
    let (mut funder, mut price) = price_with_symbol(sym);
    for i in 0..COMP_SIZE {
        let acct = price.price_acct_mut();
        acct.comp[i].publisher = AccKey {
            k: [i as u64 + 1, 0, 0, 0],
        };
        acct.num += 1;
    }

    let key = Pubkey::new_unique();
    assert!(do_add_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &key).is_err());
    assert_eq!(price.price_acct().num as usize, COMP_SIZE);
}

#[test]
fn rejects_mismatched_identity() {
    let sym = Symbol::from_str("ETH/USD");
    let (mut funder, mut price) = price_with_symbol(sym);
    let key = Pubkey::new_unique();

    let other = Symbol::from_str("ETH/EUR");
    assert!(do_add_publisher(&mut funder, &mut price, other, PTYPE_PRICE, &key).is_err());
    assert!(do_add_publisher(&mut funder, &mut price, sym, PTYPE_TWAP, &key).is_err());
}

#[test]
fn rejects_zero_publisher() {
    let sym = Symbol::from_str("ETH/USD");
    let (mut funder, mut price) = price_with_symbol(sym);

    assert!(do_add_publisher(&mut funder, &mut price, sym, PTYPE_PRICE, &Pubkey::default()).is_err());
}
