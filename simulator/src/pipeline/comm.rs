//! Collective operations across the worker pool.
//!
//! Workers are identified by rank; rank 0 coordinates. Each worker has its
//! own channel pair with the coordinator, which receives in rank order, so a
//! payload sent for one collective can never be taken by another and the
//! summed image is identical from run to run. Sends to the coordinator are
//! rendezvous: it holds at most one inbound image next to its running sum.
//!
//! A worker that leaves the group, by error or panic, drops its channels.
//! Any peer blocked on it then fails with [`SimError::PeerLost`].

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use ndarray::Array2;

use super::accumulate::IndexRow;
use super::catalog::ObjectClass;
use crate::error::{Result, SimError};

/// Rank of the coordinating worker
pub const ROOT: usize = 0;

/// Message-passing primitives used by the accumulation pipeline.
pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// `true` on every worker when any worker passes `true`
    fn any(&self, flag: bool) -> Result<bool>;

    /// Elementwise sum of every worker's image, returned on the root only
    fn reduce_sum(&self, image: Array2<f64>) -> Result<Option<Array2<f64>>>;

    /// Concatenation of every worker's rows in rank order, on the root only
    fn gather_rows(&self, class: ObjectClass, rows: Vec<IndexRow>) -> Result<Option<Vec<IndexRow>>>;
}

/// A pool of one: every collective is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoloComm;

impl Communicator for SoloComm {
    fn rank(&self) -> usize {
        ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn any(&self, flag: bool) -> Result<bool> {
        Ok(flag)
    }

    fn reduce_sum(&self, image: Array2<f64>) -> Result<Option<Array2<f64>>> {
        Ok(Some(image))
    }

    fn gather_rows(&self, _class: ObjectClass, rows: Vec<IndexRow>) -> Result<Option<Vec<IndexRow>>> {
        Ok(Some(rows))
    }
}

#[derive(Debug)]
enum Payload {
    Flag(bool),
    Image(Array2<f64>),
    Rows(ObjectClass, Vec<IndexRow>),
}

impl Payload {
    fn kind(&self) -> &'static str {
        match self {
            Payload::Flag(_) => "flag",
            Payload::Image(_) => "image",
            Payload::Rows(..) => "rows",
        }
    }
}

/// One member of a thread-backed worker group.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    /// Non-root: rendezvous channel to the coordinator
    to_root: Option<Sender<Payload>>,
    /// Non-root: broadcasts from the coordinator
    from_root: Option<Receiver<Payload>>,
    /// Root only: one inbound channel per worker, indexed by rank
    from_workers: Vec<Option<Receiver<Payload>>>,
    /// Root only: one broadcast channel per worker, indexed by rank
    to_workers: Vec<Option<Sender<Payload>>>,
}

/// Build a connected group of `n` communicators, one per worker thread.
pub fn thread_group(n: usize) -> Vec<ThreadComm> {
    let n = n.max(1);
    let mut from_workers = vec![None];
    let mut to_workers = vec![None];
    let mut members = Vec::with_capacity(n);
    for rank in 1..n {
        let (up_tx, up_rx) = bounded(0);
        let (down_tx, down_rx) = unbounded();
        from_workers.push(Some(up_rx));
        to_workers.push(Some(down_tx));
        members.push(ThreadComm {
            rank,
            size: n,
            to_root: Some(up_tx),
            from_root: Some(down_rx),
            from_workers: Vec::new(),
            to_workers: Vec::new(),
        });
    }

    let root = ThreadComm {
        rank: ROOT,
        size: n,
        to_root: None,
        from_root: None,
        from_workers,
        to_workers,
    };
    std::iter::once(root).chain(members).collect()
}

impl ThreadComm {
    fn fail(&self, reason: impl Into<String>) -> SimError {
        SimError::Worker {
            rank: self.rank,
            reason: reason.into(),
        }
    }

    fn lost(&self, peer: usize) -> SimError {
        SimError::PeerLost {
            rank: self.rank,
            peer,
        }
    }

    fn send_to_root(&self, payload: Payload) -> Result<()> {
        self.to_root
            .as_ref()
            .ok_or_else(|| self.fail("the coordinator does not send to itself"))?
            .send(payload)
            .map_err(|_| self.lost(ROOT))
    }

    fn recv_from_root(&self) -> Result<Payload> {
        self.from_root
            .as_ref()
            .ok_or_else(|| self.fail("the coordinator does not receive broadcasts"))?
            .recv()
            .map_err(|_| self.lost(ROOT))
    }

    /// Root only: the next payload from worker `peer`
    fn recv_from(&self, peer: usize) -> Result<Payload> {
        self.from_workers
            .get(peer)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.fail(format!("no channel from worker {peer}")))?
            .recv()
            .map_err(|_| self.lost(peer))
    }

    fn broadcast(&self, payload: impl Fn() -> Payload) -> Result<()> {
        for (peer, tx) in self.to_workers.iter().enumerate() {
            if let Some(tx) = tx {
                tx.send(payload()).map_err(|_| self.lost(peer))?;
            }
        }
        Ok(())
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn any(&self, flag: bool) -> Result<bool> {
        if !self.is_root() {
            self.send_to_root(Payload::Flag(flag))?;
            return match self.recv_from_root()? {
                Payload::Flag(result) => Ok(result),
                other => Err(self.fail(format!("expected flag, got {}", other.kind()))),
            };
        }

        let mut result = flag;
        for peer in 1..self.size {
            match self.recv_from(peer)? {
                Payload::Flag(f) => result |= f,
                other => return Err(self.fail(format!("expected flag, got {}", other.kind()))),
            }
        }
        self.broadcast(|| Payload::Flag(result))?;
        Ok(result)
    }

    fn reduce_sum(&self, image: Array2<f64>) -> Result<Option<Array2<f64>>> {
        if !self.is_root() {
            self.send_to_root(Payload::Image(image))?;
            return Ok(None);
        }

        let mut total = image;
        for peer in 1..self.size {
            match self.recv_from(peer)? {
                Payload::Image(part) if part.dim() == total.dim() => total += &part,
                Payload::Image(part) => {
                    return Err(self.fail(format!(
                        "image shape {:?} from worker {peer} does not match {:?}",
                        part.dim(),
                        total.dim()
                    )))
                }
                other => return Err(self.fail(format!("expected image, got {}", other.kind()))),
            }
        }
        Ok(Some(total))
    }

    fn gather_rows(&self, class: ObjectClass, rows: Vec<IndexRow>) -> Result<Option<Vec<IndexRow>>> {
        if !self.is_root() {
            self.send_to_root(Payload::Rows(class, rows))?;
            return Ok(None);
        }

        let mut all = rows;
        for peer in 1..self.size {
            match self.recv_from(peer)? {
                Payload::Rows(c, part) if c == class => all.extend(part),
                other => return Err(self.fail(format!("expected {class} rows, got {}", other.kind()))),
            }
        }
        Ok(Some(all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn row(ind: i64) -> IndexRow {
        IndexRow {
            ind,
            ..IndexRow::unrealized()
        }
    }

    #[test]
    fn test_solo_is_identity() {
        let comm = SoloComm;
        assert!(comm.is_root());
        assert!(!comm.any(false).unwrap());
        let img = Array2::from_elem((2, 2), 3.0);
        assert_eq!(comm.reduce_sum(img.clone()).unwrap(), Some(img));
    }

    #[test]
    fn test_reduce_sum_of_ones() {
        let results: Vec<Option<Array2<f64>>> = thread::scope(|s| {
            let handles: Vec<_> = thread_group(4)
                .into_iter()
                .map(|comm| s.spawn(move || comm.reduce_sum(Array2::ones((8, 8))).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results[0]
            .as_ref()
            .unwrap()
            .iter()
            .all(|&v| v == 4.0));
        assert!(results[1..].iter().all(Option::is_none));
    }

    #[test]
    fn test_any_is_shared() {
        let results: Vec<bool> = thread::scope(|s| {
            let handles: Vec<_> = thread_group(3)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let flag = comm.rank() == 2;
                        (comm.any(flag).unwrap(), comm.any(false).unwrap())
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| {
                    let (a, b) = h.join().unwrap();
                    [a, !b]
                })
                .collect()
        });
        assert!(results.iter().all(|&v| v));
    }

    #[test]
    fn test_gather_rows_in_rank_order() {
        let gathered: Vec<Option<Vec<IndexRow>>> = thread::scope(|s| {
            let handles: Vec<_> = thread_group(3)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let rows = vec![row(comm.rank() as i64 * 10), row(comm.rank() as i64 * 10 + 1)];
                        comm.gather_rows(ObjectClass::Star, rows).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let inds: Vec<i64> = gathered[0].as_ref().unwrap().iter().map(|r| r.ind).collect();
        assert_eq!(inds, vec![0, 1, 10, 11, 20, 21]);
        assert!(gathered[2].is_none());
    }

    #[test]
    fn test_worker_sends_are_rendezvous() {
        let group = thread_group(3);
        assert!(group[ROOT].to_root.is_none());
        assert_eq!(group[ROOT].from_workers.len(), 3);
        for comm in &group[1..] {
            let tx = comm.to_root.as_ref().unwrap();
            assert_eq!(tx.capacity(), Some(0));
        }
    }

    #[test]
    fn test_lost_worker_fails_its_peers() {
        let results: Vec<Result<Option<Array2<f64>>>> = thread::scope(|s| {
            let handles: Vec<_> = thread_group(4)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        comm.any(true)?;
                        if comm.rank() == 1 {
                            return Err(SimError::state("rank 1 gave up"));
                        }
                        comm.reduce_sum(Array2::ones((8, 8)))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(matches!(
            results[0],
            Err(SimError::PeerLost { rank: 0, peer: 1 })
        ));
        assert!(matches!(results[1], Err(SimError::State(_))));
        for result in &results[2..] {
            assert!(matches!(result, Err(SimError::PeerLost { peer: ROOT, .. })));
        }
    }

    #[test]
    fn test_lost_coordinator_releases_workers() {
        let results: Vec<Result<bool>> = thread::scope(|s| {
            let handles: Vec<_> = thread_group(3)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        if comm.is_root() {
                            return Err(SimError::state("coordinator gave up"));
                        }
                        comm.any(false)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results[1..]
            .iter()
            .all(|r| matches!(r, Err(SimError::PeerLost { peer: ROOT, .. }))));
    }
}
