use analysis::domains::{Height, JoinSemiLattice};
use itertools::iproduct;

use crate::domains::PointsToSet;
use crate::location::{Goroutine, Location};
use crate::ssa::ValueId;

fn alloc(thread: u32, site: usize) -> Location {
    Location::alloc(Goroutine::Thread(thread), None, ValueId(site))
}

fn top(site: usize) -> Location {
    Location::top_alloc(ValueId(site))
}

fn set<const N: usize>(locations: [Location; N]) -> PointsToSet {
    locations.into_iter().collect()
}

/// No member is represented by another member.
fn is_canonical(set: &PointsToSet) -> bool {
    iproduct!(set.iter(), set.iter()).all(|(a, b)| !a.represents(b))
}

#[test]
fn top_location_subsumes_its_site() {
    let set = PointsToSet::new().add(alloc(0, 1)).add(alloc(1, 1)).add(alloc(0, 2));
    assert_eq!(set.size(), 3);

    let with_top = set.add(top(1));
    assert_eq!(with_top.size(), 2);
    assert!(with_top.contains(&top(1)));
    assert!(with_top.contains(&alloc(5, 1)));
    assert!(!with_top.contains(&alloc(5, 2)));

    // Adding a represented location is a no-op.
    let again = with_top.add(alloc(3, 1));
    assert!(again.ptr_eq(&with_top));
}

#[test]
fn canonical_after_any_sequence_of_additions() {
    let locations = [
        alloc(0, 1),
        top(1),
        alloc(1, 1),
        alloc(0, 1).field(0),
        top(1).field(0),
        alloc(0, 2),
        Location::Nil,
    ];
    for (a, b, c) in iproduct!(&locations, &locations, &locations) {
        let set = PointsToSet::new().add(a.clone()).add(b.clone()).add(c.clone());
        assert!(is_canonical(&set), "{set} is not canonical");
        for l in [a, b, c] {
            assert!(set.contains(l));
        }
    }
}

#[test]
fn join_and_meet() {
    let ctx = ();
    let a = set([alloc(0, 1), Location::Nil]);
    let b = set([top(1)]);
    let c = set([alloc(0, 2)]);

    let ab = a.join(&b, &ctx);
    assert_eq!(ab, set([top(1), Location::Nil]));
    assert_eq!(ab, b.join(&a, &ctx));
    assert!(a <= ab && b <= ab);

    // The meet admits the locations represented by a top member.
    assert_eq!(a.mono_meet(&b), set([alloc(0, 1)]));
    assert_eq!(b.mono_meet(&a), a.mono_meet(&b));
    assert!(a.mono_meet(&c).is_empty());
    assert!(a.partial_cmp(&c).is_none());

    for (x, y, z) in iproduct!([&a, &b, &c], [&a, &b, &c], [&a, &b, &c]) {
        assert_eq!(x.join(y, &ctx).join(z, &ctx), x.join(&y.join(z, &ctx), &ctx));
    }
}

#[test]
fn join_shares_root() {
    let a: PointsToSet = (0..20).map(|i| alloc(0, i)).collect();
    let b: PointsToSet = (0..5).map(|i| alloc(0, i)).collect();
    assert!(a.join(&a, &()).ptr_eq(&a));
    assert!(a.join(&b, &()).ptr_eq(&a));
    assert!(a.join(&PointsToSet::new(), &()).ptr_eq(&a));
}

#[test]
fn nil_handling() {
    let locations = set([alloc(0, 1), Location::Nil]);
    assert!(locations.has_nil());
    assert!(!locations.filter_nil().has_nil());
    assert_eq!(locations.filter_nil().single(), Some(&alloc(0, 1)));
    assert_eq!(locations.single(), None);
    assert_eq!(PointsToSet::nil().single(), Some(&Location::Nil));
    assert_eq!(locations.height(), 2);
    assert_eq!(locations.filter(|l| !l.is_nil()), locations.filter_nil());
}

#[test]
fn inject_top_location() {
    let locations = set([alloc(0, 1), alloc(2, 1), alloc(0, 2)]);
    let injected = locations.inject_top_location(&top(1));
    assert_eq!(injected, set([top(1), alloc(0, 2)]));
    assert!(locations.inject_top_location(&top(3)).ptr_eq(&locations));
    assert_eq!(injected.to_string(), "{alloc[⊤]:v1, alloc[0]:v2}");
}
