use crate::model::*;

// ── Slot Resolution ──────────────────────────────────────────────

/// Cut each window into back-to-back slots of `slot_ms`, aligned to the
/// window's own start. A slot must fit entirely inside its window, must not
/// touch a blocked span, and must not start before `not_before`.
///
/// Existing bookings are deliberately not an input: a coach may run
/// concurrent sessions, so an occupied slot is still a candidate.
pub fn partition_windows(
    windows: &[Span],
    blocked: &[Span],
    slot_ms: Ms,
    not_before: Ms,
) -> Vec<Span> {
    if slot_ms <= 0 {
        return Vec::new();
    }
    let mut blocked = blocked.to_vec();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);

    let mut slots = Vec::new();
    for window in windows {
        let mut start = window.start;
        while start + slot_ms <= window.end {
            let slot = Span::new(start, start + slot_ms);
            if slot.start >= not_before && !is_blocked(&blocked, &slot) {
                slots.push(slot);
            }
            start += slot_ms;
        }
    }

    slots.sort_by_key(|s| (s.start, s.end));
    slots.dedup();
    slots
}

/// `blocked` must be sorted and disjoint.
fn is_blocked(blocked: &[Span], slot: &Span) -> bool {
    let first_candidate = blocked.partition_point(|b| b.end <= slot.start);
    blocked
        .get(first_candidate)
        .is_some_and(|b| b.start < slot.end)
}

/// Open time: the union of windows minus blocked spans.
pub fn open_time(windows: &[Span], blocked: &[Span]) -> Vec<Span> {
    let mut free = windows.to_vec();
    free.sort_by_key(|s| s.start);
    let free = merge_overlapping(&free);

    let mut blocked = blocked.to_vec();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);

    if blocked.is_empty() {
        return free;
    }
    subtract_intervals(&free, &blocked)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    // ── partition_windows ─────────────────────────────────

    #[test]
    fn partition_single_window_exact_fit() {
        let slots = partition_windows(&[Span::new(9 * H, 12 * H)], &[], H, 0);
        assert_eq!(
            slots,
            vec![
                Span::new(9 * H, 10 * H),
                Span::new(10 * H, 11 * H),
                Span::new(11 * H, 12 * H),
            ]
        );
    }

    #[test]
    fn partition_drops_trailing_remainder() {
        // 9:00–10:45 with 30-minute slots: the last 15 minutes fit nothing.
        let slots = partition_windows(&[Span::new(9 * H, 10 * H + 45 * M)], &[], 30 * M, 0);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots.last().unwrap().end, 10 * H + 30 * M);
    }

    #[test]
    fn partition_aligns_to_window_start() {
        let slots = partition_windows(&[Span::new(9 * H + 15 * M, 11 * H)], &[], H, 0);
        assert_eq!(slots, vec![Span::new(9 * H + 15 * M, 10 * H + 15 * M)]);
    }

    #[test]
    fn partition_skips_blocked_slots() {
        let slots = partition_windows(
            &[Span::new(9 * H, 13 * H)],
            &[Span::new(10 * H + 30 * M, 11 * H)],
            H,
            0,
        );
        assert_eq!(
            slots,
            vec![
                Span::new(9 * H, 10 * H),
                Span::new(11 * H, 12 * H),
                Span::new(12 * H, 13 * H),
            ]
        );
    }

    #[test]
    fn partition_adjacent_block_does_not_hide_slot() {
        let slots = partition_windows(&[Span::new(9 * H, 10 * H)], &[Span::new(10 * H, 11 * H)], H, 0);
        assert_eq!(slots, vec![Span::new(9 * H, 10 * H)]);
    }

    #[test]
    fn partition_drops_slots_before_cutoff() {
        let slots = partition_windows(&[Span::new(9 * H, 12 * H)], &[], H, 10 * H + 1);
        assert_eq!(slots, vec![Span::new(11 * H, 12 * H)]);
    }

    #[test]
    fn partition_dedups_overlapping_windows() {
        let slots = partition_windows(
            &[Span::new(9 * H, 11 * H), Span::new(9 * H, 10 * H)],
            &[],
            H,
            0,
        );
        assert_eq!(slots, vec![Span::new(9 * H, 10 * H), Span::new(10 * H, 11 * H)]);
    }

    #[test]
    fn partition_orders_multiple_windows() {
        let slots = partition_windows(
            &[Span::new(14 * H, 15 * H), Span::new(8 * H, 9 * H)],
            &[],
            H,
            0,
        );
        assert_eq!(slots, vec![Span::new(8 * H, 9 * H), Span::new(14 * H, 15 * H)]);
    }

    #[test]
    fn partition_duration_longer_than_window() {
        assert!(partition_windows(&[Span::new(9 * H, 10 * H)], &[], 2 * H, 0).is_empty());
    }

    #[test]
    fn partition_zero_duration_is_empty() {
        assert!(partition_windows(&[Span::new(9 * H, 10 * H)], &[], 0, 0).is_empty());
    }

    // ── open_time ─────────────────────────────────────────

    #[test]
    fn open_time_merges_and_subtracts() {
        let free = open_time(
            &[Span::new(13 * H, 17 * H), Span::new(9 * H, 13 * H)],
            &[Span::new(12 * H, 14 * H)],
        );
        assert_eq!(free, vec![Span::new(9 * H, 12 * H), Span::new(14 * H, 17 * H)]);
    }

    #[test]
    fn open_time_no_windows() {
        assert!(open_time(&[], &[Span::new(0, H)]).is_empty());
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let result = subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_intervals(&[Span::new(100, 300)], &[Span::new(150, 200)]);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        let result = subtract_intervals(&[Span::new(0, 1000)], &remove);
        assert_eq!(
            result,
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    #[test]
    fn merge_empty() {
        assert!(merge_overlapping(&[]).is_empty());
    }
}
