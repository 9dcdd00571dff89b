use super::*;
use crate::test_utils::{MockChain, Recorder, spend};

fn assert_strictly_sorted(pool: &PendingPool) {
    for pair in pool.as_slice().windows(2) {
        assert!(pair[0] < pair[1], "pool out of order");
    }
}

#[test]
fn add_then_duplicate() {
    let mut pool = PendingPool::new();
    let mut generator = Recorder::default();
    let mut peers = Recorder::default();
    let tx_a = spend("a", 1);

    assert_eq!(
        pool.add(tx_a.clone(), &mut generator, &mut peers),
        AddOutcome::Inserted(0)
    );
    assert_eq!(
        pool.add(tx_a.clone(), &mut generator, &mut peers),
        AddOutcome::Duplicate
    );

    assert_eq!(pool.len(), 1);
    assert_eq!(generator.positions, vec![0]);
    assert_eq!(peers.new_pending.len(), 1);
}

#[test]
fn equal_content_is_a_duplicate_even_as_a_new_allocation() {
    let mut pool = PendingPool::new();
    pool.add(spend("a", 1), &mut (), &mut ());
    assert_eq!(pool.add(spend("a", 1), &mut (), &mut ()), AddOutcome::Duplicate);
    assert_eq!(pool.len(), 1);
}

#[test]
fn stays_sorted_whatever_the_arrival_order() {
    let txs: Vec<_> = (0..24).map(|i| spend(&format!("out-{i}"), i)).collect();
    let mut generator = Recorder::default();
    let mut pool = PendingPool::new();

    // stride through the list so arrivals are far from sorted
    for i in 0..txs.len() {
        let tx = &txs[(i * 7) % txs.len()];
        let AddOutcome::Inserted(position) = pool.add(tx.clone(), &mut generator, &mut ()) else {
            panic!("unexpected duplicate");
        };
        assert_eq!(pool.get(position), Some(tx));
        assert_strictly_sorted(&pool);
    }

    for tx in &txs {
        assert_eq!(pool.add(tx.clone(), &mut (), &mut ()), AddOutcome::Duplicate);
    }
    assert_eq!(pool.len(), txs.len());
    assert_eq!(generator.positions.len(), txs.len());
}

#[test]
fn lookup_by_content_and_id() {
    let mut pool = PendingPool::new();
    let tx = spend("a", 3);
    pool.add(tx.clone(), &mut (), &mut ());

    assert!(pool.contains(&tx));
    assert!(!pool.contains(&spend("b", 3)));
    assert_eq!(pool.find(&tx.hash().unwrap()), Some(&tx));
    assert_eq!(pool.position(&tx), Ok(0));
}

#[test]
fn reconcile_drops_confirmed_without_retracting() {
    let mut pool = PendingPool::new();
    let (a, b) = (spend("a", 1), spend("b", 2));
    pool.add(a.clone(), &mut (), &mut ());
    pool.add(b.clone(), &mut (), &mut ());

    let mut chain = MockChain::default();
    chain.confirm(&a);
    let mut peers = Recorder::default();
    let pool = pool.reconcile(&chain, &mut peers);

    assert_eq!(pool.as_slice(), &[b]);
    assert!(peers.retracted.is_empty());
}

#[test]
fn reconcile_retracts_invalid() {
    let mut pool = PendingPool::new();
    let (a, b) = (spend("a", 1), spend("b", 2));
    pool.add(a.clone(), &mut (), &mut ());
    pool.add(b.clone(), &mut (), &mut ());

    let mut chain = MockChain::default();
    chain.invalidate(&b);
    let mut peers = Recorder::default();
    let pool = pool.reconcile(&chain, &mut peers);

    assert_eq!(pool.as_slice(), &[a]);
    assert_eq!(peers.retracted, vec![(*b).clone()]);
}

#[test]
fn reorg_round_trip_restores_the_pool() {
    let txs: Vec<_> = (0..6).map(|i| spend(&format!("r-{i}"), i)).collect();
    let mut pool = PendingPool::new();
    for tx in &txs {
        pool.add(tx.clone(), &mut (), &mut ());
    }
    let before: Vec<_> = pool.iter().cloned().collect();

    // the block confirms half the pool
    let mut chain = MockChain::default();
    let mined = &txs[..3];
    for tx in mined {
        chain.confirm(tx);
    }
    let pool = pool.reconcile(&chain, &mut ());
    assert_eq!(pool.len(), 3);

    // then gets evicted; one of its transactions is donated twice
    for tx in mined {
        chain.unconfirm(tx);
    }
    let mut dirty = pool.bulk_add(mined.iter().cloned());
    dirty.bulk_add([mined[0].clone()]);
    assert_eq!(dirty.len(), 7);

    let pool = dirty.reconcile(&chain, &mut ());
    assert_strictly_sorted(&pool);
    assert_eq!(pool.iter().cloned().collect::<Vec<_>>(), before);
}

#[test]
fn donated_duplicates_of_pending_entries_collapse() {
    let mut pool = PendingPool::new();
    let a = spend("a", 1);
    pool.add(a.clone(), &mut (), &mut ());

    let dirty = pool.bulk_add([spend("a", 1), a.clone(), spend("z", 9)]);
    let pool = dirty.reconcile(&MockChain::default(), &mut ());

    assert_eq!(pool.len(), 2);
    assert_strictly_sorted(&pool);
}

#[test]
fn invalid_transaction_donated_twice_is_retracted_once() {
    let b = spend("b", 2);
    let mut dirty = PendingPool::new().bulk_add([b.clone()]);
    dirty.bulk_add([spend("b", 2)]);

    let mut chain = MockChain::default();
    chain.invalidate(&b);
    let mut peers = Recorder::default();
    let pool = dirty.reconcile(&chain, &mut peers);

    assert!(pool.is_empty());
    assert_eq!(peers.retracted, vec![(*b).clone()]);
}

#[test]
fn empty_reconcile_is_harmless() {
    let pool = PendingPool::new().bulk_add([]).reconcile(&MockChain::default(), &mut ());
    assert!(pool.is_empty());
}
