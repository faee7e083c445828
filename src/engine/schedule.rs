use crate::model::*;

// ── Schedule resolution ──────────────────────────────────────────

/// Effective free windows for one instructor on one calendar day.
///
/// Weekly rules matching the day's weekday form the base set. ADD overrides
/// are unioned in before anything is subtracted; REMOVE overrides and time
/// off are then carved out. The result is sorted by start, pairwise disjoint,
/// non-adjacent, and contains no zero-length windows.
pub fn resolve_day(state: &InstructorState, day: Day) -> Vec<Window> {
    let origin = day_start(day);
    let dow = weekday(day);

    // Step 1: base coverage from the weekly recurrence, plus ADD overrides.
    let mut open: Vec<Window> = state
        .rules_for(dow)
        .map(|r| Window::new(origin + r.start, origin + r.end))
        .collect();
    for o in state.overrides_on(day) {
        if o.polarity == Polarity::Add {
            open.push(Window::new(origin + o.start, origin + o.end));
        }
    }
    open.sort_by_key(|w| w.start);
    let free = merge_windows(&open);

    // Step 2: carve out REMOVE overrides and time off. A block wholly outside
    // the open set is a no-op.
    let mut closed: Vec<Window> = state
        .overrides_on(day)
        .filter(|o| o.polarity == Polarity::Remove)
        .map(|o| Window::new(origin + o.start, origin + o.end))
        .collect();
    closed.extend(state.time_off_on(day).map(|t| t.window_on(day)));

    if closed.is_empty() {
        return free;
    }
    closed.sort_by_key(|w| w.start);
    subtract_windows(&free, &closed)
}

/// Merge sorted overlapping/adjacent windows into disjoint windows.
pub fn merge_windows(sorted: &[Window]) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::new();
    for &window in sorted {
        if let Some(last) = merged.last_mut()
            && window.start <= last.end {
                last.end = last.end.max(window.end);
                continue;
            }
        merged.push(window);
    }
    merged
}

/// Remove every window in `closed` from `open`. A single subtraction may
/// split an open window into zero, one, or two remaining pieces.
/// `closed` must be sorted by start; overlap within it is tolerated.
pub fn subtract_windows(open: &[Window], closed: &[Window]) -> Vec<Window> {
    let mut result = Vec::new();
    let mut ci = 0;

    for &w in open {
        let mut current_start = w.start;
        let current_end = w.end;

        while ci < closed.len() && closed[ci].end <= current_start {
            ci += 1;
        }

        let mut j = ci;
        while j < closed.len() && closed[j].start < current_end {
            let c = &closed[j];
            if c.start > current_start {
                result.push(Window::new(current_start, c.start));
            }
            current_start = current_start.max(c.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Window::new(current_start, current_end));
        }
    }

    result
}
