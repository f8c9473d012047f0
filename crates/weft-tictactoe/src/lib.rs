//! Tic-Tac-Toe encoded as behavioral threads.
//!
//! This crate consumes only the weft kernel's public contract.  The game
//! rules are not implemented anywhere as a monolithic state machine;
//! instead each rule is its own b-thread:
//!
//! - **enforce-turns** alternately blocks O marks while X is to move and X
//!   marks while O is to move.
//! - **square(r, c)**, one per cell, waits for the first mark on its cell
//!   and then blocks that cell forever.
//! - **line watchers**, one per line and side, count marks of their side on
//!   their line and request the win event after the third.
//! - **o-player** perpetually requests every O move in its preference
//!   order (center, corners, edges); blocked moves are simply never
//!   selected.
//! - **clicker** translates a click on a cell into an X mark request.
//! - **stop-on-outcome** waits for a win or draw and then blocks every
//!   further event, which quiesces the system.
//!
//! A driver thread (see the crate's tests) posts clicks and observes O
//! moves and outcomes, exactly as a UI would.

use weft_kernel::{Admitter, Bid, SyncHandle};

/// One game event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    /// A user click on a board cell.
    Click(u8, u8),
    /// X claims a cell.
    X(u8, u8),
    /// O claims a cell.
    O(u8, u8),
    XWin,
    OWin,
    Draw,
}

impl Move {
    /// The board cell a mark claims, if this is a mark.
    pub fn cell(self) -> Option<(u8, u8)> {
        match self {
            Move::X(r, c) | Move::O(r, c) => Some((r, c)),
            _ => None,
        }
    }

    pub fn is_mark(self) -> bool {
        self.cell().is_some()
    }

    pub fn is_x_mark(self) -> bool {
        matches!(self, Move::X(..))
    }

    pub fn is_o_mark(self) -> bool {
        matches!(self, Move::O(..))
    }

    /// A win or a draw.
    pub fn is_outcome(self) -> bool {
        matches!(self, Move::XWin | Move::OWin | Move::Draw)
    }
}

/// The eight winning lines: rows, columns, diagonals.
pub const LINES: [[(u8, u8); 3]; 8] = [
    [(0, 0), (0, 1), (0, 2)],
    [(1, 0), (1, 1), (1, 2)],
    [(2, 0), (2, 1), (2, 2)],
    [(0, 0), (1, 0), (2, 0)],
    [(0, 1), (1, 1), (2, 1)],
    [(0, 2), (1, 2), (2, 2)],
    [(0, 0), (1, 1), (2, 2)],
    [(0, 2), (1, 1), (2, 0)],
];

/// O's move preference: center, then corners, then edges.
const O_PREFERENCE: [(u8, u8); 9] = [
    (1, 1),
    (0, 0),
    (0, 2),
    (2, 0),
    (2, 2),
    (0, 1),
    (1, 0),
    (1, 2),
    (2, 1),
];

/// Admit the full cast of game threads.  Line watchers outrank the players
/// so that a completed line is announced before the next move is picked.
pub fn admit_game(admitter: &Admitter<Move>) {
    admitter.admit("enforce-turns", enforce_turns);
    admitter.admit("clicker", clicker);
    admitter.admit("o-player", o_player);
    for (r, c) in (0..3u8).flat_map(|r| (0..3u8).map(move |c| (r, c))) {
        admitter
            .admit(format!("square-{r}{c}"), move |handle| {
                square_taken(handle, r, c)
            });
    }
    for (i, line) in LINES.into_iter().enumerate() {
        admitter
            .admit_with_priority(format!("x-line-{i}"), 2, move |handle| {
                line_watch(handle, line, Side::X)
            });
        admitter
            .admit_with_priority(format!("o-line-{i}"), 2, move |handle| {
                line_watch(handle, line, Side::O)
            });
    }
    admitter.admit("detect-draw", detect_draw);
    admitter.admit("stop-on-outcome", stop_on_outcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    X,
    O,
}

/// X moves first; after every X mark O may move, and vice versa.
async fn enforce_turns(mut handle: SyncHandle<Move>) -> anyhow::Result<()> {
    loop {
        handle
            .sync(Bid::wait_for(|m: &Move| m.is_x_mark()).block(|m| m.is_o_mark()))
            .await?;
        handle
            .sync(Bid::wait_for(|m: &Move| m.is_o_mark()).block(|m| m.is_x_mark()))
            .await?;
    }
}

/// Translates each click into an X mark request.
async fn clicker(mut handle: SyncHandle<Move>) -> anyhow::Result<()> {
    loop {
        let click = handle
            .sync(Bid::wait_for(|m| matches!(m, Move::Click(..))))
            .await?;
        let Move::Click(r, c) = click else {
            continue;
        };
        handle.sync(Bid::request([Move::X(r, c)])).await?;
    }
}

/// Once a cell is marked, no mark may ever land on it again.
async fn square_taken(mut handle: SyncHandle<Move>, r: u8, c: u8) -> anyhow::Result<()> {
    handle
        .sync(Bid::wait_for(move |m: &Move| m.cell() == Some((r, c))))
        .await?;
    // Never advanced: the block stands for the rest of the game.
    handle
        .sync(Bid::new().block(move |m: &Move| m.cell() == Some((r, c))))
        .await?;
    Ok(())
}

/// Requests the win event after observing three marks of `side` on `line`.
/// Distinctness of the three marks is guaranteed by the square threads.
async fn line_watch(
    mut handle: SyncHandle<Move>,
    line: [(u8, u8); 3],
    side: Side,
) -> anyhow::Result<()> {
    for _ in 0..3 {
        handle
            .sync(Bid::wait_for(move |m: &Move| {
                let ours = match side {
                    Side::X => m.is_x_mark(),
                    Side::O => m.is_o_mark(),
                };
                ours && m.cell().is_some_and(|cell| line.contains(&cell))
            }))
            .await?;
    }
    let win = match side {
        Side::X => Move::XWin,
        Side::O => Move::OWin,
    };
    tracing::debug!(?win, ?line, "line complete");
    handle.sync(Bid::request([win])).await?;
    Ok(())
}

/// Perpetually requests every O move in preference order.  Taken squares
/// and out-of-turn moves are blocked by the other threads, so the first
/// selectable entry is O's actual move.
async fn o_player(mut handle: SyncHandle<Move>) -> anyhow::Result<()> {
    let mut remaining: Vec<Move> = O_PREFERENCE.into_iter().map(|(r, c)| Move::O(r, c)).collect();
    loop {
        let picked = handle.sync(Bid::request(remaining.clone())).await?;
        remaining.retain(|m| *m != picked);
    }
}

/// After nine marks with no winner, the game is a draw.
async fn detect_draw(mut handle: SyncHandle<Move>) -> anyhow::Result<()> {
    for _ in 0..9 {
        handle.sync(Bid::wait_for(|m: &Move| m.is_mark())).await?;
    }
    handle.sync(Bid::request([Move::Draw])).await?;
    Ok(())
}

/// The first outcome ends the game: everything after it is blocked.
async fn stop_on_outcome(mut handle: SyncHandle<Move>) -> anyhow::Result<()> {
    handle.sync(Bid::wait_for(|m: &Move| m.is_outcome())).await?;
    handle.sync(Bid::new().block(|_| true)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
