// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Oblivious building blocks: conditional moves, the bitonic sorting network, compaction,
//! bucketing and routing.
//!
//! Every function here performs a sequence of memory accesses and conditional swaps that is
//! determined by the input sizes and public parameters alone.

// Overriding Clippy's judgment and asserting that in this case,
// a range loop is the best way to convey the intent of the code.
#![allow(clippy::needless_range_loop)]

use crate::{tuple::Tuple, Result, TableError, Value};
use duplicate::duplicate_item;
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq, ConstantTimeGreater, ConstantTimeLess};

/// Constant-time conditional assignment and swap.
pub trait CtMove {
    /// Sets `self` to `other` iff `choice` is set.
    fn cmove(&mut self, other: &Self, choice: Choice);
    /// Exchanges `a` and `b` iff `choice` is set.
    fn cswap(a: &mut Self, b: &mut Self, choice: Choice);
}

#[duplicate_item(
    int_type;
    [u8];
    [i32];
    [u32];
    [i64];
    [u64];
)]
impl CtMove for int_type {
    fn cmove(&mut self, other: &Self, choice: Choice) {
        self.conditional_assign(other, choice);
    }

    fn cswap(a: &mut Self, b: &mut Self, choice: Choice) {
        int_type::conditional_swap(a, b, choice);
    }
}

/// An element that the networks in this module can move around.
pub trait Element: CtMove {
    /// Whether the element is padding.
    fn ct_is_dummy(&self) -> Choice;
    /// Turns the element into padding iff `choice` is set.
    fn ct_mark_dummy(&mut self, choice: Choice);
}

// Plain integers never act as padding.
#[duplicate_item(
    int_type;
    [i32];
    [u64];
)]
impl Element for int_type {
    fn ct_is_dummy(&self) -> Choice {
        Choice::from(0)
    }

    fn ct_mark_dummy(&mut self, _choice: Choice) {}
}

/// Constant-time `a < b` for signed values.
pub(crate) fn ct_lt_i32(a: Value, b: Value) -> Choice {
    let flip = |v: Value| (v as u32) ^ 0x8000_0000;
    flip(a).ct_lt(&flip(b))
}

pub(crate) fn choice_to_u64(choice: Choice) -> u64 {
    u64::from(choice.unwrap_u8())
}

/// Swaps `items[i]` and `items[j]` iff `choice` is set. Requires `i < j`.
pub(crate) fn cswap_at<T: CtMove>(items: &mut [T], i: usize, j: usize, choice: Choice) {
    debug_assert!(i < j);
    let (left, right) = items.split_at_mut(j);
    T::cswap(&mut left[i], &mut right[0], choice);
}

/// Returns the largest power of two that is at most `x`, or `x` itself when `x <= 2`.
pub fn prev_pow_two(x: usize) -> usize {
    if x <= 2 {
        x
    } else {
        1 << (usize::BITS - 1 - x.leading_zeros())
    }
}

/// An indexed sequence the networks rearrange.
pub(crate) trait Network {
    fn size(&self) -> usize;
    fn ct_is_dummy(&self, i: usize) -> Choice;
    fn ct_mark_dummy(&mut self, i: usize, choice: Choice);
    fn cswap(&mut self, i: usize, j: usize, choice: Choice);
}

impl<T: Element> Network for [T] {
    fn size(&self) -> usize {
        self.len()
    }

    fn ct_is_dummy(&self, i: usize) -> Choice {
        self[i].ct_is_dummy()
    }

    fn ct_mark_dummy(&mut self, i: usize, choice: Choice) {
        self[i].ct_mark_dummy(choice);
    }

    fn cswap(&mut self, i: usize, j: usize, choice: Choice) {
        cswap_at(self, i, j, choice);
    }
}

/// Elements moved in lockstep with a vector of integer keys.
pub(crate) struct Keyed<'a, T> {
    pub(crate) items: &'a mut [T],
    pub(crate) keys: &'a mut [u64],
}

impl<T: Element> Network for Keyed<'_, T> {
    fn size(&self) -> usize {
        self.items.len()
    }

    fn ct_is_dummy(&self, i: usize) -> Choice {
        self.items[i].ct_is_dummy()
    }

    fn ct_mark_dummy(&mut self, i: usize, choice: Choice) {
        self.items[i].ct_mark_dummy(choice);
    }

    fn cswap(&mut self, i: usize, j: usize, choice: Choice) {
        cswap_at(self.items, i, j, choice);
        cswap_at(self.keys, i, j, choice);
    }
}

fn keyed<'a, T: Element>(items: &'a mut [T], keys: &'a mut [u64]) -> Result<Keyed<'a, T>> {
    if items.len() != keys.len() {
        return Err(TableError::Shape(format!(
            "{} elements but {} keys",
            items.len(),
            keys.len()
        )));
    }
    Ok(Keyed { items, keys })
}

/// Bitonic sort for arbitrary `n`, based on code written by Hans Werner Lang
/// and available [here](https://hwlang.de/algorithmen/sortieren/bitonic/oddn.htm).
/// `less(net, i, j)` compares the elements currently at `i` and `j`.
fn bitonic_sort<N, F>(net: &mut N, lo: usize, n: usize, direction: Choice, less: &F)
where
    N: Network + ?Sized,
    F: Fn(&N, usize, usize) -> Choice,
{
    if n > 1 {
        let m = n / 2;
        bitonic_sort(net, lo, m, !direction, less);
        bitonic_sort(net, lo + m, n - m, direction, less);
        bitonic_merge(net, lo, n, direction, less);
    }
}

fn bitonic_merge<N, F>(net: &mut N, lo: usize, n: usize, direction: Choice, less: &F)
where
    N: Network + ?Sized,
    F: Fn(&N, usize, usize) -> Choice,
{
    if n > 1 {
        let m = n.next_power_of_two() >> 1;
        for i in lo..(lo + n - m) {
            let j = i + m;
            let jlti = less(&*net, j, i);
            let do_swap = !(jlti ^ direction);
            net.cswap(i, j, do_swap);
        }

        bitonic_merge(net, lo, m, direction, less);
        bitonic_merge(net, lo + m, n - m, direction, less);
    }
}

/// Sorts `tuples` on `cols`, obliviously. Dummies end up last, or first when `ascending` is
/// false.
pub fn sort(tuples: &mut [Tuple], cols: &[usize], ascending: bool) {
    let n = tuples.len();
    let less = |t: &[Tuple], i: usize, j: usize| t[i].ct_less_in_cols(&t[j], cols);
    bitonic_sort(tuples, 0, n, Choice::from(u8::from(ascending)), &less);
}

/// Sorts `items` in ascending order of `keys`, obliviously.
pub fn sort_by_key<T: Element>(items: &mut [T], keys: &mut [u64]) -> Result<()> {
    let n = items.len();
    let mut net = keyed(items, keys)?;
    let less = |k: &Keyed<'_, T>, i: usize, j: usize| k.keys[i].ct_lt(&k.keys[j]);
    bitonic_sort(&mut net, 0, n, Choice::from(1), &less);
    Ok(())
}

fn marker_count(markers: &[u8]) -> u64 {
    markers.iter().map(|&m| u64::from(m & 1)).sum()
}

/// Moves the elements whose marker is 1 to the front of `items` and the others behind them,
/// both in their original relative order.
pub fn compact<T: Element + Clone>(items: &mut [T], markers: &[u8]) -> Result<()> {
    if items.len() != markers.len() {
        return Err(TableError::Shape(format!(
            "{} elements but {} markers",
            items.len(),
            markers.len()
        )));
    }
    let m = marker_count(markers);

    // Unmarked element `i` belongs at `m + i - (marked before i)`, which is never below `i`.
    // Marked elements keep key 0 and are only ever displaced.
    let mut tail = items.to_vec();
    let mut targets = Vec::with_capacity(markers.len());
    let mut marked_before = 0u64;
    for (i, &marker) in markers.iter().enumerate() {
        let marked = Choice::from(marker & 1);
        let mut target = m + i as u64 - marked_before;
        target.conditional_assign(&0, marked);
        targets.push(target);
        marked_before += u64::from(marker & 1);
    }
    let mut net = keyed(&mut tail, &mut targets)?;
    cascade(&mut net, &|k: &Keyed<'_, T>, i: usize, dst: usize| {
        !k.keys[i].ct_lt(&(dst as u64))
    });

    compact_net(items, markers)?;
    for (i, (item, moved)) in items.iter_mut().zip(&tail).enumerate() {
        item.cmove(moved, !(i as u64).ct_lt(&m));
    }
    Ok(())
}

pub(crate) fn compact_net<N: Network + ?Sized>(net: &mut N, markers: &[u8]) -> Result<()> {
    if net.size() != markers.len() {
        return Err(TableError::Shape(format!(
            "{} elements but {} markers",
            net.size(),
            markers.len()
        )));
    }
    compact_range(net, markers, 0, 0, markers.len());
    Ok(())
}

// `markers[i - base]` belongs to the element initially at `i`.
fn compact_range<N: Network + ?Sized>(
    net: &mut N,
    markers: &[u8],
    base: usize,
    lo: usize,
    hi: usize,
) {
    let n = hi - lo;
    if n < 2 {
        return;
    }
    let n1 = prev_pow_two(n);
    let n2 = n - n1;
    let m = marker_count(&markers[lo - base..lo + n2 - base]);

    compact_range(net, markers, base, lo, lo + n2);
    let offset = ((n1 - n2) as u64 + m) & (n1 as u64 - 1);
    offset_compact(net, markers, base, lo + n2, hi, offset);

    for i in 0..n2 {
        net.cswap(lo + i, lo + i + n1, !(i as u64).ct_lt(&m));
    }
}

/// Compacts a power-of-two range so that the marked elements start at offset `z`, wrapping
/// around the end of the range.
fn offset_compact<N: Network + ?Sized>(
    net: &mut N,
    markers: &[u8],
    base: usize,
    lo: usize,
    hi: usize,
    z: u64,
) {
    let n = hi - lo;
    if n < 2 {
        return;
    }
    if n == 2 {
        let first = Choice::from(markers[lo - base] & 1);
        let second = Choice::from(markers[lo + 1 - base] & 1);
        let rotate = Choice::from((z & 1) as u8);
        net.cswap(lo, lo + 1, (!first & second) ^ rotate);
        return;
    }

    let half = n / 2;
    let h = half as u64;
    let m = marker_count(&markers[lo - base..lo + half - base]);
    let z_left = z & (h - 1);
    let z_right = (z + m) & (h - 1);
    let wraps = !(z_left + m).ct_lt(&h) ^ !z.ct_lt(&h);

    offset_compact(net, markers, base, lo, lo + half, z_left);
    offset_compact(net, markers, base, lo + half, hi, z_right);

    for i in 0..half {
        let past_right = !(i as u64).ct_lt(&z_right);
        net.cswap(lo + i, lo + i + half, wraps ^ past_right);
    }
}

/// Recursively splits `[lo, hi)` into buckets `plo..=phi` of `bound` slots each.
/// `goes_left(net, i, pivot)` says whether the element at `i` belongs to a bucket `<= pivot`.
/// Real elements beyond a bucket range's capacity are turned into dummies.
fn partition_rec<N, F>(
    net: &mut N,
    lo: usize,
    hi: usize,
    plo: usize,
    phi: usize,
    bound: usize,
    goes_left: &F,
) where
    N: Network + ?Sized,
    F: Fn(&N, usize, usize) -> Choice,
{
    if phi <= plo {
        return;
    }
    let pmid = (plo + phi) / 2;
    let left_padded = (pmid - plo + 1) * bound;
    let lp = left_padded as u64;
    let rc = (hi - lo - left_padded) as u64;

    let mut left_real = 0u64;
    for i in lo..hi {
        left_real += choice_to_u64(!net.ct_is_dummy(i) & goes_left(&*net, i, pmid));
    }
    let mut left_num = left_real;
    left_num.conditional_assign(&lp, lp.ct_lt(&left_real));

    let mut markers = vec![0u8; hi - lo];
    let mut seen_left = 0u64;
    let mut seen_right = 0u64;
    for i in lo..hi {
        let real = !net.ct_is_dummy(i);
        let left = goes_left(&*net, i, pmid);
        let real_left = real & left;
        let real_right = real & !left;
        seen_left += choice_to_u64(real_left);
        seen_right += choice_to_u64(real_right);
        let drop_left = real_left & seen_left.ct_gt(&lp);
        let drop_right = real_right & seen_right.ct_gt(&rc);
        net.ct_mark_dummy(i, drop_left | drop_right);

        let fill = left_num.ct_lt(&lp) & net.ct_is_dummy(i);
        left_num += choice_to_u64(fill);
        markers[i - lo] = (fill | (real_left & !drop_left)).unwrap_u8();
    }
    compact_range(net, &markers, lo, lo, hi);

    let mid = lo + left_padded;
    partition_rec(net, lo, mid, plo, pmid, bound, goes_left);
    partition_rec(net, mid, hi, pmid + 1, phi, bound, goes_left);
}

fn pad_to(tuples: &mut Vec<Tuple>, len: usize, width: usize) -> Result<()> {
    if tuples.len() > len {
        return Err(TableError::Shape(format!(
            "{} rows do not fit in {} padded slots",
            tuples.len(),
            len
        )));
    }
    tuples.resize(len, Tuple::dummy(width));
    Ok(())
}

/// Buckets `tuples` against `pivots.len() + 1` ranges delimited by the sorted `pivots`: bucket
/// `j` receives the rows in `[pivots[j - 1], pivots[j])`. The output holds exactly
/// `(pivots.len() + 1) * bound` rows, bucket `j` at `[j * bound, (j + 1) * bound)`, and surplus
/// rows of an overflowing bucket are dropped.
pub fn partition_by_pivots(
    tuples: &mut Vec<Tuple>,
    pivots: &[Tuple],
    cols: &[usize],
    bound: usize,
    width: usize,
) -> Result<()> {
    let buckets = pivots.len() + 1;
    pad_to(tuples, buckets * bound, width)?;
    let goes_left = |t: &[Tuple], i: usize, j: usize| t[i].ct_less_in_cols(&pivots[j], cols);
    partition_rec(
        tuples.as_mut_slice(),
        0,
        buckets * bound,
        0,
        buckets - 1,
        bound,
        &goes_left,
    );
    Ok(())
}

/// Buckets `tuples` by their explicit `targets` in `[0, p)`. The output holds exactly
/// `p * bound` rows, bucket `j` at `[j * bound, (j + 1) * bound)`, and surplus rows of an
/// overflowing bucket are dropped.
pub fn shuffle(
    tuples: &mut Vec<Tuple>,
    targets: &mut Vec<u64>,
    p: usize,
    bound: usize,
    width: usize,
) -> Result<()> {
    if p == 0 {
        return Err(TableError::Shape("cannot shuffle into zero buckets".into()));
    }
    if targets.len() != tuples.len() {
        return Err(TableError::Shape(format!(
            "{} rows but {} targets",
            tuples.len(),
            targets.len()
        )));
    }
    pad_to(tuples, p * bound, width)?;
    targets.resize(p * bound, 0);
    let mut net = keyed(tuples, targets)?;
    let goes_left = |k: &Keyed<'_, Tuple>, i: usize, j: usize| !k.keys[i].ct_gt(&(j as u64));
    partition_rec(&mut net, 0, p * bound, 0, p - 1, bound, &goes_left);
    Ok(())
}

/// Moves each real element `i` to position `targets[i]`. Real targets must be distinct,
/// ascending in input order and satisfy `targets[i] >= i`; dummies are ignored.
pub fn distribute<T: Element>(items: &mut [T], targets: &mut [u64]) -> Result<()> {
    let mut net = keyed(items, targets)?;
    cascade(&mut net, &|k: &Keyed<'_, T>, i: usize, dst: usize| {
        !k.keys[i].ct_lt(&(dst as u64)) & !k.ct_is_dummy(i)
    });
    Ok(())
}

/// Power-of-two cascade of conditional swaps: at every distance `j`, from the back, the
/// element at `i` moves to `i + j` when `moves(net, i, i + j)` says so.
fn cascade<N, F>(net: &mut N, moves: &F)
where
    N: Network + ?Sized,
    F: Fn(&N, usize, usize) -> Choice,
{
    let n = net.size();
    if n < 2 {
        return;
    }
    let mut j = prev_pow_two(n - 1);
    while j >= 1 {
        for i in (0..n - j).rev() {
            let cond = moves(&*net, i, i + j);
            net.cswap(i, i + j, cond);
        }
        j /= 2;
    }
}

/// [`distribute`] with the target of each row read from column `col`.
pub fn distribute_by_col(tuples: &mut [Tuple], col: usize) -> Result<()> {
    let mut targets: Vec<u64> = tuples
        .iter()
        .map(|t| i64::from(t.data[col]).max(0) as u64)
        .collect();
    distribute(tuples, &mut targets)
}

/// Sort-based alternative to [`shuffle`]: orders rows by target, ranks them within their
/// target, drops ranks beyond `bound`, then routes each row to `target * bound + rank`.
pub fn shuffle_soda(
    tuples: &mut Vec<Tuple>,
    targets: &mut Vec<u64>,
    p: usize,
    bound: usize,
    width: usize,
) -> Result<()> {
    if targets.len() != tuples.len() {
        return Err(TableError::Shape(format!(
            "{} rows but {} targets",
            tuples.len(),
            targets.len()
        )));
    }
    let overflow_target = p as u64;
    for (t, target) in tuples.iter().zip(targets.iter_mut()) {
        target.conditional_assign(&overflow_target, t.ct_is_dummy());
    }
    sort_by_key(tuples, targets)?;

    let bound64 = bound as u64;
    let mut positions = vec![0u64; tuples.len()];
    let mut rank = 0u64;
    let mut previous = u64::MAX;
    for i in 0..tuples.len() {
        rank.conditional_assign(&0, !targets[i].ct_eq(&previous));
        tuples[i].ct_mark_dummy(!rank.ct_lt(&bound64));
        positions[i] = targets[i].wrapping_mul(bound64).wrapping_add(rank);
        rank += 1;
        previous = targets[i];
    }

    let markers: Vec<u8> = tuples.iter().map(|t| (!t.ct_is_dummy()).unwrap_u8()).collect();
    compact_net(&mut keyed(tuples, &mut positions)?, &markers)?;

    let padded = p * bound;
    tuples.resize(padded, Tuple::dummy(width));
    positions.resize(padded, 0);
    distribute(tuples, &mut positions)?;
    *targets = (0..padded).map(|i| (i / bound.max(1)) as u64).collect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::random_tuples;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn is_sorted_dummies_last(tuples: &[Tuple], cols: &[usize]) -> bool {
        tuples
            .windows(2)
            .all(|w| !bool::from(w[1].ct_less_in_cols(&w[0], cols)))
    }

    fn test_sort_random(n: usize) {
        let mut rng = StdRng::seed_from_u64(0);
        let mut tuples = random_tuples(&mut rng, n, 3, 10, 0.25);
        let mut expected: Vec<Tuple> = tuples.iter().filter(|t| !t.is_dummy()).cloned().collect();
        expected.sort_by_key(|t| (t.data[1], t.data[0]));

        sort(&mut tuples, &[1, 0], true);
        assert!(is_sorted_dummies_last(&tuples, &[1, 0]));
        let real: Vec<(i32, i32)> = tuples
            .iter()
            .filter(|t| !t.is_dummy())
            .map(|t| (t.data[1], t.data[0]))
            .collect();
        let want: Vec<(i32, i32)> = expected.iter().map(|t| (t.data[1], t.data[0])).collect();
        assert_eq!(real, want);
        assert_eq!(tuples.len(), n);
    }

    fn test_compact_random(n: usize) {
        let mut rng = StdRng::seed_from_u64(n as u64);
        let mut items: Vec<i32> = (0..n as i32).collect();
        let markers: Vec<u8> = (0..n).map(|_| rng.gen_range(0..2)).collect();
        compact(&mut items, &markers).unwrap();

        let mut expected: Vec<i32> = (0..n as i32).filter(|&i| markers[i as usize] == 1).collect();
        expected.extend((0..n as i32).filter(|&i| markers[i as usize] == 0));
        assert_eq!(items, expected);
    }

    macro_rules! create_obliv_size_tests {
        ($($n:expr),*) => {
            $(
                paste::paste! {
                    #[test]
                    fn [<sort_random_ $n>]() {
                        test_sort_random($n);
                    }

                    #[test]
                    fn [<compact_random_ $n>]() {
                        test_compact_random($n);
                    }
                }
            )*
        };
    }

    create_obliv_size_tests!(0, 1, 2, 3, 5, 8, 13, 64, 100);

    #[test]
    fn compaction_keeps_both_sides_in_order() {
        let mut items: Vec<i32> = (0..8).collect();
        compact(&mut items, &[1, 0, 0, 1, 0, 1, 0, 0]).unwrap();
        assert_eq!(items, vec![0, 3, 5, 1, 2, 4, 6, 7]);

        let mut all_marked: Vec<i32> = (0..5).collect();
        compact(&mut all_marked, &[1; 5]).unwrap();
        assert_eq!(all_marked, vec![0, 1, 2, 3, 4]);
        assert!(compact(&mut all_marked, &[1; 4]).is_err());
    }

    #[test]
    fn compaction_moves_unmarked_dummies_too() {
        let mut tuples: Vec<Tuple> = (0..6).map(|v| Tuple::new(vec![v])).collect();
        tuples[1].ct_mark_dummy(Choice::from(1));
        tuples[4].ct_mark_dummy(Choice::from(1));
        compact(&mut tuples, &[0, 0, 1, 1, 0, 1]).unwrap();
        let order: Vec<Value> = tuples.iter().map(|t| t.data[0]).collect();
        assert_eq!(order, vec![2, 3, 5, 0, 1, 4]);
        assert!(tuples[4].is_dummy() && tuples[5].is_dummy());
    }

    #[test]
    fn descending_sort_puts_dummies_first() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut tuples = random_tuples(&mut rng, 40, 2, 50, 0.3);
        sort(&mut tuples, &[0], false);
        let first_real = tuples.iter().position(|t| !t.is_dummy()).unwrap();
        assert!(tuples[first_real..].iter().all(|t| !t.is_dummy()));
        assert!(tuples[first_real..]
            .windows(2)
            .all(|w| w[0].data[0] >= w[1].data[0]));
    }

    #[test]
    fn sort_handles_all_dummy_and_no_dummy_inputs() {
        let mut all_dummy = vec![Tuple::dummy(2); 7];
        sort(&mut all_dummy, &[0], true);
        assert!(all_dummy.iter().all(Tuple::is_dummy));

        let mut rng = StdRng::seed_from_u64(2);
        let mut no_dummy = random_tuples(&mut rng, 33, 1, 5, 0.0);
        sort(&mut no_dummy, &[0], true);
        assert!(no_dummy.windows(2).all(|w| w[0].data[0] <= w[1].data[0]));
    }

    #[test]
    fn sort_by_key_orders_items() {
        let mut items: Vec<i32> = vec![4, 2, 9, 1, 7];
        let mut keys: Vec<u64> = items.iter().map(|&v| (v * 10) as u64).collect();
        sort_by_key(&mut items, &mut keys).unwrap();
        assert_eq!(items, vec![1, 2, 4, 7, 9]);
        assert!(sort_by_key(&mut items, &mut keys[..2]).is_err());
    }

    #[test]
    fn prev_pow_two_values() {
        let expected = [(0, 0), (1, 1), (2, 2), (3, 2), (4, 4), (7, 4), (8, 8), (1000, 512)];
        for (x, want) in expected {
            assert_eq!(prev_pow_two(x), want);
        }
    }

    #[test]
    fn signed_comparison_is_ordered() {
        assert!(bool::from(ct_lt_i32(-5, 3)));
        assert!(bool::from(ct_lt_i32(i32::MIN, i32::MAX)));
        assert!(!bool::from(ct_lt_i32(3, -5)));
        assert!(!bool::from(ct_lt_i32(7, 7)));
    }

    #[test]
    fn shuffle_pads_and_buckets() {
        let mut rng = StdRng::seed_from_u64(3);
        for &(p, bound) in &[(1usize, 20usize), (3, 12), (4, 9), (5, 8)] {
            let mut tuples = random_tuples(&mut rng, 20, 2, 100, 0.2);
            let mut targets: Vec<u64> = (0..20).map(|_| rng.gen_range(0..p as u64)).collect();
            let mut expected = vec![Vec::new(); p];
            for (t, &target) in tuples.iter().zip(&targets) {
                if !t.is_dummy() {
                    expected[target as usize].push(t.data.clone());
                }
            }
            let fits = expected.iter().all(|b| b.len() <= bound);

            shuffle(&mut tuples, &mut targets, p, bound, 2).unwrap();
            assert_eq!(tuples.len(), p * bound);
            for (b, want) in expected.iter().enumerate() {
                let mut got: Vec<Vec<i32>> = tuples[b * bound..(b + 1) * bound]
                    .iter()
                    .filter(|t| !t.is_dummy())
                    .map(|t| t.data.clone())
                    .collect();
                assert!(got.len() <= bound);
                if fits {
                    let mut want = want.clone();
                    got.sort();
                    want.sort();
                    assert_eq!(got, want);
                }
            }
        }
    }

    #[test]
    fn shuffle_drops_overflow_silently() {
        let mut tuples: Vec<Tuple> = (0..6).map(|v| Tuple::new(vec![v])).collect();
        let mut targets = vec![0u64; 6];
        shuffle(&mut tuples, &mut targets, 2, 4, 1).unwrap();
        assert_eq!(tuples.len(), 8);
        let kept: Vec<&Tuple> = tuples.iter().filter(|t| !t.is_dummy()).collect();
        assert_eq!(kept.len(), 4);
        assert!(tuples[..4].iter().all(|t| !t.is_dummy()));
        assert!(tuples[4..].iter().all(Tuple::is_dummy));
    }

    #[test]
    fn shuffle_rejects_undersized_bound() {
        let mut tuples: Vec<Tuple> = (0..6).map(|v| Tuple::new(vec![v])).collect();
        let mut targets = vec![0u64; 6];
        assert!(shuffle(&mut tuples, &mut targets, 2, 2, 1).is_err());
    }

    #[test]
    fn partition_by_pivots_respects_ranges() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut tuples = random_tuples(&mut rng, 30, 2, 60, 0.1);
        let real = tuples.iter().filter(|t| !t.is_dummy()).count();
        let pivots = vec![Tuple::new(vec![20, 0]), Tuple::new(vec![40, 0])];
        partition_by_pivots(&mut tuples, &pivots, &[0], 30, 2).unwrap();
        assert_eq!(tuples.len(), 90);
        assert_eq!(tuples.iter().filter(|t| !t.is_dummy()).count(), real);
        let ranges = [(i32::MIN, 20), (20, 40), (40, i32::MAX)];
        for (b, (low, high)) in ranges.iter().enumerate() {
            for t in tuples[b * 30..(b + 1) * 30].iter().filter(|t| !t.is_dummy()) {
                assert!(t.data[0] >= *low && t.data[0] < *high);
            }
        }
    }

    #[test]
    fn distribute_routes_to_targets() {
        let mut items: Vec<Tuple> = vec![
            Tuple::new(vec![10]),
            Tuple::new(vec![11]),
            Tuple::new(vec![12]),
            Tuple::dummy(1),
            Tuple::dummy(1),
            Tuple::dummy(1),
        ];
        let mut targets = vec![1u64, 2, 5, 0, 0, 0];
        distribute(&mut items, &mut targets).unwrap();
        assert_eq!(items[1], Tuple::new(vec![10]));
        assert_eq!(items[2], Tuple::new(vec![11]));
        assert_eq!(items[5], Tuple::new(vec![12]));
        assert!(items[0].is_dummy() && items[3].is_dummy() && items[4].is_dummy());
    }

    #[test]
    fn distribute_by_col_reads_positions() {
        let mut tuples = vec![
            Tuple::new(vec![7, 0]),
            Tuple::new(vec![8, 3]),
            Tuple::dummy(2),
            Tuple::dummy(2),
        ];
        distribute_by_col(&mut tuples, 1).unwrap();
        assert_eq!(tuples[0].data, vec![7, 0]);
        assert_eq!(tuples[3].data, vec![8, 3]);
        assert!(tuples[1].is_dummy() && tuples[2].is_dummy());
    }

    #[test]
    fn shuffle_soda_buckets_by_target() {
        let mut rng = StdRng::seed_from_u64(5);
        let (p, bound) = (3usize, 8usize);
        let mut tuples = random_tuples(&mut rng, 15, 1, 1000, 0.2);
        let mut targets: Vec<u64> = (0..15).map(|_| rng.gen_range(0..p as u64)).collect();
        let mut expected = vec![Vec::new(); p];
        for (t, &target) in tuples.iter().zip(&targets) {
            if !t.is_dummy() {
                expected[target as usize].push(t.data[0]);
            }
        }
        shuffle_soda(&mut tuples, &mut targets, p, bound, 1).unwrap();
        assert_eq!(tuples.len(), p * bound);
        for (b, want) in expected.iter().enumerate() {
            let mut got: Vec<i32> = tuples[b * bound..(b + 1) * bound]
                .iter()
                .filter(|t| !t.is_dummy())
                .map(|t| t.data[0])
                .collect();
            let mut want: Vec<i32> = want.iter().copied().take(bound).collect();
            got.sort_unstable();
            want.sort_unstable();
            if expected[b].len() <= bound {
                assert_eq!(got, want);
            } else {
                assert_eq!(got.len(), bound);
            }
        }
    }
}
