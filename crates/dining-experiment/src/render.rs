//! Console board rendering.
//!
//! One column per seat, nine characters wide:
//!
//! ```text
//!  ═════════════════════════════════════════════
//! ║ P0       P1       P2       P3       P4      ║
//! ║ ||       __       _|       __       __      ║
//! ║ e        t        w        t        t       ║
//! ║ 3        2        2        3        2       ║
//!  ═════════════════════════════════════════════
//! Lowest meal count: 2
//! Must think: 0 0 0 0 0
//! ```

use std::fmt::Write;

use contention_kernel::{FinalReport, SeatId, SeatState, TableSnapshot};

const COLUMN_WIDTH: usize = 9;

/// Slot glyph for a seat: `||` both slots, `|_` left only, `_|` right only,
/// `__` none. An eating seat always shows `||`.
pub fn slot_glyph(snapshot: &TableSnapshot, seat: SeatId) -> &'static str {
    let holds = |slot: usize| snapshot.slots[slot].holder == Some(seat);
    let left = holds(snapshot.left_slot(seat));
    let right = holds(snapshot.right_slot(seat));
    if snapshot.seats[seat].state == SeatState::Eating || (left && right) {
        "||"
    } else if left {
        "|_"
    } else if right {
        "_|"
    } else {
        "__"
    }
}

/// Render one status frame.
pub fn render_board(snapshot: &TableSnapshot) -> String {
    let rule = "═".repeat(snapshot.len() * COLUMN_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, " {}", rule);
    out.push('║');
    for seat in &snapshot.seats {
        let _ = write!(out, " {:<8}", format!("P{}", seat.id));
    }
    out.push_str("║\n║");
    for seat in &snapshot.seats {
        let _ = write!(out, " {:<8}", slot_glyph(snapshot, seat.id));
    }
    out.push_str("║\n║");
    for seat in &snapshot.seats {
        let _ = write!(out, " {:<8}", seat.state.letter());
    }
    out.push_str("║\n║");
    for seat in &snapshot.seats {
        let _ = write!(out, " {:<7} ", seat.meal_count);
    }
    let _ = writeln!(out, "║");
    let _ = writeln!(out, " {}", rule);

    let _ = writeln!(out, "Lowest meal count: {}", snapshot.population_minimum());
    let flags: Vec<&str> = snapshot
        .seats
        .iter()
        .map(|s| if s.must_restrain { "1" } else { "0" })
        .collect();
    let _ = writeln!(out, "Must think: {}", flags.join(" "));
    out
}

/// Render the final report printed at shutdown.
pub fn render_final(report: &FinalReport) -> String {
    let mut out = String::from("Final Status:\n");
    for seat in &report.seats {
        let _ = writeln!(
            out,
            "Seat {} - State: {}, Times eaten: {}, Must think: {}",
            seat.id, seat.state, seat.meal_count, seat.must_restrain as u8
        );
    }
    let _ = writeln!(
        out,
        "Meals: {}  Fairness gap: {}  Starvation aborts: {}  Liveness stalls: {}  Invariant violations: {}",
        report.total_meals(),
        report.fairness_gap,
        report.totals.starvation_aborts,
        report.totals.liveness_stalls,
        report.totals.invariant_violations
    );
    out
}
