use coframe_core::{ids::AuthorId, record::CellAddr, table::Table, value::CellValue};

use crate::error::EngineError;
use crate::shadow::{ShadowCell, ShadowSet};

/// How a cell with enough distinct editors collapses to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The value proposed by the most authors wins; a tie for first place
    /// is reported, never broken arbitrarily.
    MajorityVote,
    /// The value carried by the greatest token wins; a token tie falls
    /// back to the greater author id.
    LastWriterWins,
}

/// Cell skipped because fewer distinct authors than the quorum wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoQuorumCell {
    pub addr: CellAddr,
    pub editors: usize,
}

/// Cell left at its baseline value because the vote had no unique winner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieCell {
    pub addr: CellAddr,
    /// Every distinct proposed value with its vote count, ordered by the
    /// first proposing author.
    pub candidates: Vec<(CellValue, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub no_quorum: Vec<NoQuorumCell>,
    pub ties: Vec<TieCell>,
}

impl ResolutionReport {
    pub fn is_clean(&self) -> bool {
        self.no_quorum.is_empty() && self.ties.is_empty()
    }
}

/// Outcome of a resolution pass: the merged table plus everything that
/// could not be decided.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub table: Table,
    pub report: ResolutionReport,
}

/// Collapses per-author shadows over the baseline snapshot.
///
/// Cells nobody wrote keep their baseline value and are not reported.
/// Cells with fewer than `quorum` distinct authors keep the baseline and
/// land in the no-quorum report. Cells at or above quorum collapse via
/// `strategy`. Report order follows the snapshot's row-then-column order.
pub fn resolve(
    baseline: &Table,
    shadows: &ShadowSet,
    quorum: usize,
    strategy: MergeStrategy,
) -> Result<Resolution, EngineError> {
    if quorum == 0 {
        return Err(EngineError::InvalidQuorum(quorum));
    }

    let mut table = baseline.clone();
    let mut report = ResolutionReport::default();

    for row in baseline.rows().to_vec() {
        for column in baseline.columns().to_vec() {
            let addr = CellAddr::new(row, column.clone());
            let writes = shadows.cell_writes(&addr);
            if writes.is_empty() {
                continue;
            }
            if writes.len() < quorum {
                report.no_quorum.push(NoQuorumCell {
                    addr,
                    editors: writes.len(),
                });
                continue;
            }
            match strategy {
                MergeStrategy::MajorityVote => {
                    let tally = tally_votes(&writes);
                    match unique_winner(&tally) {
                        Some(value) => table.set(row, &column, value.clone())?,
                        None => report.ties.push(TieCell {
                            addr,
                            candidates: tally,
                        }),
                    }
                }
                MergeStrategy::LastWriterWins => {
                    // The quorum gate guarantees a non-empty slice here.
                    if let Some(value) = last_writer(&writes) {
                        table.set(row, &column, value.clone())?;
                    }
                }
            }
        }
    }

    Ok(Resolution { table, report })
}

fn tally_votes(writes: &[(&AuthorId, &ShadowCell)]) -> Vec<(CellValue, usize)> {
    let mut tally: Vec<(CellValue, usize)> = Vec::new();
    for (_, cell) in writes {
        match tally.iter_mut().find(|(value, _)| *value == cell.value) {
            Some((_, count)) => *count += 1,
            None => tally.push((cell.value.clone(), 1)),
        }
    }
    tally
}

fn unique_winner(tally: &[(CellValue, usize)]) -> Option<&CellValue> {
    let best = tally.iter().map(|(_, count)| *count).max().unwrap_or(0);
    let mut winners = tally.iter().filter(|(_, count)| *count == best);
    match (winners.next(), winners.next()) {
        (Some((value, _)), None) => Some(value),
        _ => None,
    }
}

/// Greatest token wins. One store never issues duplicate tokens; the
/// author tiebreak keeps the fold total across stores.
fn last_writer<'a>(writes: &'a [(&AuthorId, &ShadowCell)]) -> Option<&'a CellValue> {
    let mut best: Option<&(&AuthorId, &ShadowCell)> = None;
    for write in writes {
        let better = match best {
            None => true,
            Some((best_author, best_cell)) => match write.1.token.cmp(&best_cell.token) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => write.0 > *best_author,
            },
        };
        if better {
            best = Some(write);
        }
    }
    best.map(|(_, cell)| &cell.value)
}
