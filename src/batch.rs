// *****************************************************************************
// Modbus polling client library
// Copyright (c) 2021 by the authors, see LICENSE
//
// This program is free software; you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation; either version 2 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program; if not, write to the Free Software Foundation, Inc.,
// 59 Temple Place, Suite 330, Boston, MA  02111-1307  USA
//
// Module authors:
//   Georg Brandl <g.brandl@fz-juelich.de>
//
// *****************************************************************************

//! Merging of due read demands into a single transaction.

use itertools::Itertools;

use crate::ledger::{Lifespan, Signature};

/// Size constraints for merged reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of points in one transaction.
    pub max_registers: u16,
    /// Maximum number of unrequested points between two merged signatures.
    pub max_unused: u16,
}

/// A read transaction and the signatures it services.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub window: Signature,
    pub members: Vec<Signature>,
}

impl Batch {
    /// Offset of `member` into the transaction result.
    pub fn offset_of(&self, member: &Signature) -> usize {
        (member.start - self.window.start) as usize
    }
}

/// Picks the next transaction to run.
///
/// The earliest-due signature (the leader) is always part of the result;
/// other due signatures are folded in when they share unit and function,
/// lie within `max_unused` of the window and keep it within
/// `max_registers`.  Signatures larger than `max_registers` on their own
/// are never serviced.
pub fn optimize(due: &[(Signature, Lifespan)], limits: Limits) -> Option<Batch> {
    let fits = |sig: &Signature| sig.count <= limits.max_registers;

    for (sig, _) in due.iter().filter(|(sig, _)| !fits(sig)) {
        log::debug!("skipping {:?}: larger than {} points", sig, limits.max_registers);
    }

    let leader = due.iter()
        .filter(|(sig, _)| fits(sig))
        .min_by_key(|(sig, span)| (span.next_service, *sig))
        .map(|(sig, _)| *sig)?;

    let mut window: Option<Signature> = None;
    let mut members = Vec::new();

    for sig in due.iter().map(|(sig, _)| *sig).filter(fits).sorted() {
        let folded = match window.as_mut() {
            Some(win) if win.unit == sig.unit && win.function == sig.function => {
                let gap = sig.start as i64 - win.end() as i64;
                let span = sig.end() - win.start as u32;
                if gap > limits.max_unused as i64 || span > limits.max_registers as u32 {
                    false
                } else {
                    win.count = win.count.max(span as u16);
                    true
                }
            }
            _ => false,
        };

        if folded {
            members.push(sig);
            continue;
        }
        if members.contains(&leader) {
            break;
        }
        window = Some(sig);
        members = vec![sig];
    }

    if members.contains(&leader) {
        window.map(|window| Batch { window, members })
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::ledger::ReadFunction::{self, *};

    const LIMITS: Limits = Limits { max_registers: 16, max_unused: 5 };

    fn due(specs: &[(ReadFunction, u16, u16, u64)]) -> Vec<(Signature, Lifespan)> {
        let t0 = Instant::now();
        specs.iter().map(|&(function, start, count, age)| {
            let span = Lifespan {
                next_service: t0 - Duration::from_millis(age),
                expiry: t0 + Duration::from_secs(60),
            };
            (Signature::new(1, function, start, count), span)
        }).collect()
    }

    fn sig(function: ReadFunction, start: u16, count: u16) -> Signature {
        Signature::new(1, function, start, count)
    }

    #[test]
    fn merges_neighbours_within_gap() {
        let batch = optimize(&due(&[(HoldingRegisters, 0, 2, 10),
                                    (HoldingRegisters, 2, 2, 5),
                                    (HoldingRegisters, 10, 1, 5)]), LIMITS).unwrap();
        assert_eq!(batch.window, sig(HoldingRegisters, 0, 4));
        assert_eq!(batch.members, [sig(HoldingRegisters, 0, 2), sig(HoldingRegisters, 2, 2)]);
        assert_eq!(batch.offset_of(&sig(HoldingRegisters, 2, 2)), 2);
    }

    #[test]
    fn gap_at_limit_is_merged() {
        let batch = optimize(&due(&[(HoldingRegisters, 0, 2, 10),
                                    (HoldingRegisters, 7, 1, 5)]), LIMITS).unwrap();
        assert_eq!(batch.window, sig(HoldingRegisters, 0, 8));
        assert_eq!(batch.members.len(), 2);
    }

    /// An oversize signature is never read, and being the earliest due does
    /// not hold back the admissible ones.
    #[test]
    fn oversize_leader_does_not_stall_others() {
        let input = due(&[(HoldingRegisters, 0, 20, 100), (HoldingRegisters, 30, 2, 5)]);
        let batch = optimize(&input, LIMITS).unwrap();
        assert_eq!(batch.window, sig(HoldingRegisters, 30, 2));
        assert_eq!(batch.members, [sig(HoldingRegisters, 30, 2)]);

        assert_eq!(optimize(&due(&[(InputRegisters, 0, 17, 0)]), LIMITS), None);
    }

    #[test]
    fn leader_window_is_returned() {
        let input = due(&[(HoldingRegisters, 0, 2, 1),
                          (HoldingRegisters, 100, 2, 50),
                          (HoldingRegisters, 103, 2, 1),
                          (InputRegisters, 0, 1, 1)]);
        let batch = optimize(&input, LIMITS).unwrap();
        assert_eq!(batch.window, sig(HoldingRegisters, 100, 5));
        assert_eq!(batch.members, [sig(HoldingRegisters, 100, 2), sig(HoldingRegisters, 103, 2)]);
    }

    #[test]
    fn window_is_cut_at_size_limit() {
        let input = due(&[(HoldingRegisters, 0, 8, 50),
                          (HoldingRegisters, 8, 8, 1),
                          (HoldingRegisters, 16, 4, 1)]);
        let batch = optimize(&input, LIMITS).unwrap();
        assert_eq!(batch.window, sig(HoldingRegisters, 0, 16));
        assert_eq!(batch.members.len(), 2);
    }

    #[test]
    fn overlapping_and_contained_signatures() {
        let input = due(&[(Coils, 0, 10, 5), (Coils, 2, 3, 5), (Coils, 8, 4, 5)]);
        let batch = optimize(&input, LIMITS).unwrap();
        assert_eq!(batch.window, sig(Coils, 0, 12));
        assert_eq!(batch.members.len(), 3);
    }

    #[test]
    fn functions_and_units_are_not_mixed() {
        let mut input = due(&[(Coils, 0, 1, 50), (DiscreteInputs, 1, 1, 1)]);
        let other = Signature::new(2, Coils, 1, 1);
        let span = input[1].1;
        input.push((other, span));
        let batch = optimize(&input, LIMITS).unwrap();
        assert_eq!(batch.members, [sig(Coils, 0, 1)]);
    }

    #[test]
    fn nothing_due() {
        assert_eq!(optimize(&[], LIMITS), None);
    }
}
