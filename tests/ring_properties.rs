//! Ring placement properties: determinism, balance, minimal disruption.

use coralkv::{HashRing, NodeAddr};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

fn nodes(n: usize) -> Vec<NodeAddr> {
    (0..n)
        .map(|i| NodeAddr::from(format!("http://127.0.0.1:{}", 8082 + i).as_str()))
        .collect()
}

fn random_keys(count: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect()
        })
        .collect()
}

#[test]
fn locate_is_deterministic_across_instances() {
    let a = HashRing::with_defaults(nodes(5));
    let b = HashRing::with_defaults(nodes(5));
    for key in random_keys(1_000, 1) {
        assert_eq!(a.locate(&key, 3), b.locate(&key, 3));
    }
}

#[test]
fn locate_returns_exactly_min_k_nodes_distinct() {
    for node_count in 1..=5 {
        let ring = HashRing::with_defaults(nodes(node_count));
        for key in random_keys(200, node_count as u64) {
            for k in 0..=6 {
                let located = ring.locate(&key, k);
                assert_eq!(located.len(), k.min(node_count));
                let mut dedup = located.clone();
                dedup.sort();
                dedup.dedup();
                assert_eq!(dedup.len(), located.len());
            }
        }
    }
}

#[test]
fn balance_over_uniform_keys() {
    let ring = HashRing::with_defaults(nodes(3));
    let keys = random_keys(10_000, 7);
    let mut counts: HashMap<NodeAddr, usize> = HashMap::new();
    for key in &keys {
        *counts.entry(ring.primary(key).unwrap()).or_default() += 1;
    }
    assert_eq!(counts.len(), 3);
    for (node, count) in counts {
        let share = count as f64 / keys.len() as f64;
        assert!(
            (0.25..=0.42).contains(&share),
            "{node} owns {share:.3} of the key space"
        );
    }
}

#[test]
fn adding_a_node_remaps_a_bounded_fraction() {
    let ring = HashRing::with_defaults(nodes(3));
    let keys = random_keys(10_000, 11);
    let before: Vec<_> = keys.iter().map(|k| ring.primary(k).unwrap()).collect();

    ring.add(NodeAddr::from("http://127.0.0.1:9000"));

    let moved = keys
        .iter()
        .zip(&before)
        .filter(|(key, prev)| ring.primary(key).unwrap() != **prev)
        .count();
    let fraction = moved as f64 / keys.len() as f64;
    assert!(
        fraction <= 1.5 / 4.0,
        "add remapped {fraction:.3} of keys (expected ≈ 1/4)"
    );
    // Some keys must move, or the new node is dead weight.
    assert!(moved > 0);
}

#[test]
fn removing_a_node_remaps_only_its_keys() {
    let all = nodes(3);
    let ring = HashRing::with_defaults(all.clone());
    let keys = random_keys(10_000, 13);
    let before: Vec<_> = keys.iter().map(|k| ring.primary(k).unwrap()).collect();
    let victim = all[1].clone();

    ring.remove(&victim);

    for (key, prev) in keys.iter().zip(&before) {
        let now = ring.primary(key).unwrap();
        if *prev == victim {
            assert_ne!(now, victim);
        } else {
            // Keys not owned by the victim keep their primary.
            assert_eq!(now, *prev);
        }
    }
    let moved = keys
        .iter()
        .zip(&before)
        .filter(|(_, prev)| **prev == victim)
        .count();
    let fraction = moved as f64 / keys.len() as f64;
    assert!(fraction <= 1.5 / 3.0);
}

#[test]
fn replica_sets_agree_across_services() {
    // The gateway and any future service building a ring from the same
    // node list must compute identical replica sets — simulate two
    // processes by building from differently-ordered input.
    let forward = HashRing::with_defaults(nodes(4));
    let mut reversed = nodes(4);
    reversed.reverse();
    let backward = HashRing::with_defaults(reversed);

    for key in random_keys(1_000, 17) {
        assert_eq!(forward.locate(&key, 3), backward.locate(&key, 3));
    }
}
