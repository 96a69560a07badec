//! Replicas as threads of one process: tree reduce, root gather, broadcast back.

use super::CollectiveTransport;
use crate::{
    all_reduce::{combine, ReduceKind},
    invalid_group_spec, protocol_violation, shape_mismatch, timeout, Blob, CommError,
    ReplicaGroup, TensorLayout,
};
use digit_layout::DigitLayout;
use log::{trace, warn};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{AcqRel, Acquire},
        },
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

#[derive(Clone)]
pub struct InprocNode {
    rank: usize,
    senders: Arc<[Sender<Message>]>,
    mailbox: Arc<Mutex<Mailbox>>,
    poisoned: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl InprocNode {
    #[inline]
    pub fn new(n: usize) -> Vec<Self> {
        Self::with_timeout(n, None)
    }

    /// Connects `n` replicas that give up waiting for a peer after `timeout`.
    pub fn with_timeout(n: usize, timeout: Option<Duration>) -> Vec<Self> {
        let mut senders = Vec::with_capacity(n);
        let mut receivers = Vec::with_capacity(n);
        for _ in 0..n {
            let (sender, receiver) = channel();
            senders.push(sender);
            receivers.push(receiver);
        }
        let senders: Arc<[Sender<Message>]> = senders.into();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                rank,
                senders: senders.clone(),
                mailbox: Arc::new(Mutex::new(Mailbox {
                    receiver,
                    stash: VecDeque::new(),
                    seq: 0,
                })),
                poisoned: Arc::new(AtomicBool::new(false)),
                timeout,
            })
            .collect()
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Acquire)
    }

    /// Serializes calls on this node and refuses them once it is poisoned.
    fn enter(&self) -> Result<MutexGuard<'_, Mailbox>, CommError> {
        let mailbox = self.mailbox.lock().map_err(|_| {
            self.broken(protocol_violation(format!(
                "replica {} panicked inside a collective",
                self.rank
            )))
        })?;
        if self.is_poisoned() {
            return Err(protocol_violation(format!(
                "replica {} is unusable after an earlier failure",
                self.rank
            )));
        }
        Ok(mailbox)
    }

    fn position(&self, group: &ReplicaGroup) -> Result<usize, CommError> {
        if group.ranks().iter().any(|&r| r >= self.senders.len()) {
            return Err(invalid_group_spec(format!(
                "{:?} exceeds world size {}",
                group.ranks(),
                self.senders.len()
            )));
        }
        group.position(self.rank).ok_or_else(|| {
            invalid_group_spec(format!("rank {} is not in {:?}", self.rank, group.ranks()))
        })
    }

    fn send(&self, dst: usize, header: &Header, payload: Payload) -> Result<(), CommError> {
        trace!("replica {} -> {dst}: {header:?}", self.rank);
        self.senders[dst]
            .send(Message {
                src: self.rank,
                header: header.clone(),
                payload,
            })
            .map_err(|_| self.broken(protocol_violation(format!("replica {dst} is gone"))))
    }

    fn recv(&self, mailbox: &mut Mailbox, src: usize) -> Result<Message, CommError> {
        let msg = mailbox
            .recv_from(src, self.timeout)
            .map_err(|e| self.broken(e))?;
        trace!("replica {} <- {src}: {:?}", self.rank, msg.header);
        Ok(msg)
    }

    fn broken(&self, e: CommError) -> CommError {
        if !self.poisoned.swap(true, AcqRel) {
            warn!("replica {} stops serving collectives: {e}", self.rank)
        }
        e
    }
}

impl CollectiveTransport for InprocNode {
    #[inline]
    fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    fn world_size(&self) -> usize {
        self.senders.len()
    }

    fn all_reduce(
        &self,
        group: &ReplicaGroup,
        kind: ReduceKind,
        layout: &TensorLayout,
        data: &mut [u8],
    ) -> Result<(), CommError> {
        let mut mailbox = self.enter()?;
        let pos = self.position(group)?;
        let header = mailbox.header(Op::Reduce(kind), layout);
        let ranks = group.ranks();
        let n = ranks.len();
        if n == 1 {
            return Ok(());
        }

        let mut acc = Ok(Blob::from_bytes(data));
        let mut stride = 1;
        while stride < n {
            if pos % (2 * stride) != 0 {
                self.send(ranks[pos - stride], &header, acc.into())?;
                acc = Err(protocol_violation("contribution already handed over"));
                break;
            }
            if pos + stride < n {
                let src = ranks[pos + stride];
                let msg = self.recv(&mut mailbox, src)?;
                acc = acc.and_then(|mut acc| {
                    header.verify(&msg.header, src)?;
                    match msg.payload {
                        Payload::Data(blob) => {
                            combine(kind, layout.dt(), &mut acc, &blob)?;
                            Ok(acc)
                        }
                        Payload::Failed(e) => Err(e),
                        _ => Err(protocol_violation(format!(
                            "replica {src} sent a broadcast payload upward"
                        ))),
                    }
                });
            }
            stride *= 2;
        }

        let result = if pos == 0 {
            let result = acc.map(Arc::new);
            for &peer in &ranks[1..] {
                let payload = match &result {
                    Ok(blob) => Payload::Shared(blob.clone()),
                    Err(e) => Payload::Failed(e.clone()),
                };
                self.send(peer, &header, payload)?;
            }
            result
        } else {
            let root = group.root();
            let msg = self.recv(&mut mailbox, root)?;
            match msg.payload {
                Payload::Failed(e) => Err(e),
                Payload::Shared(blob) if msg.header == header => Ok(blob),
                _ => Err(self.broken(protocol_violation(format!(
                    "root {root} broadcast {:?}, expected {header:?}",
                    msg.header
                )))),
            }
        };

        let result = result?;
        data.copy_from_slice(&result);
        Ok(())
    }

    fn all_gather(
        &self,
        group: &ReplicaGroup,
        layout: &TensorLayout,
        dim: usize,
        data: &[u8],
    ) -> Result<Arc<[Blob]>, CommError> {
        let mut mailbox = self.enter()?;
        let pos = self.position(group)?;
        let header = mailbox.header(Op::Gather(dim), layout);
        let ranks = group.ranks();
        if ranks.len() == 1 {
            return Ok(Arc::from(vec![Blob::from_bytes(data)]));
        }

        let root = group.root();
        if pos != 0 {
            self.send(root, &header, Payload::Data(Blob::from_bytes(data)))?;
            let msg = self.recv(&mut mailbox, root)?;
            return match msg.payload {
                Payload::Failed(e) => Err(e),
                Payload::Pieces(pieces) if msg.header == header => Ok(pieces),
                _ => Err(self.broken(protocol_violation(format!(
                    "root {root} broadcast {:?}, expected {header:?}",
                    msg.header
                )))),
            };
        }

        let mut pieces = Vec::with_capacity(ranks.len());
        pieces.push(Blob::from_bytes(data));
        let mut error = None;
        for &src in &ranks[1..] {
            let msg = self.recv(&mut mailbox, src)?;
            let check = if !header.same_call(&msg.header) {
                header.verify(&msg.header, src)
            } else if header.shape != msg.header.shape {
                Err(shape_mismatch(format!(
                    "replica {src} contributes {:?}, replica {root} contributes {:?}",
                    msg.header.shape, header.shape,
                )))
            } else {
                Ok(())
            };
            match (check, msg.payload) {
                (Ok(()), Payload::Data(blob)) => pieces.push(blob),
                (Err(e), _) => {
                    error.get_or_insert(e);
                }
                (Ok(()), _) => {
                    error.get_or_insert(protocol_violation(format!(
                        "replica {src} sent a broadcast payload upward"
                    )));
                }
            }
        }

        let result = match error {
            Some(e) => Err(e),
            None => Ok(Arc::<[Blob]>::from(pieces)),
        };
        for &peer in &ranks[1..] {
            let payload = match &result {
                Ok(pieces) => Payload::Pieces(pieces.clone()),
                Err(e) => Payload::Failed(e.clone()),
            };
            self.send(peer, &header, payload)?;
        }
        result
    }
}

struct Mailbox {
    receiver: Receiver<Message>,
    stash: VecDeque<Message>,
    seq: u64,
}

impl Mailbox {
    fn header(&mut self, op: Op, layout: &TensorLayout) -> Header {
        let seq = self.seq;
        self.seq += 1;
        Header {
            seq,
            op,
            dt: layout.dt(),
            shape: layout.shape().into(),
        }
    }

    fn recv_from(&mut self, src: usize, limit: Option<Duration>) -> Result<Message, CommError> {
        if let Some(i) = self.stash.iter().position(|msg| msg.src == src) {
            if let Some(msg) = self.stash.remove(i) {
                return Ok(msg);
            }
        }
        loop {
            let msg = match limit {
                Some(t) => self.receiver.recv_timeout(t).map_err(|e| match e {
                    RecvTimeoutError::Timeout => {
                        timeout(format!("replica {src} did not show up within {t:?}"))
                    }
                    RecvTimeoutError::Disconnected => protocol_violation("every peer is gone"),
                })?,
                None => self
                    .receiver
                    .recv()
                    .map_err(|_| protocol_violation("every peer is gone"))?,
            };
            if msg.src == src {
                return Ok(msg);
            }
            self.stash.push_back(msg)
        }
    }
}

struct Message {
    src: usize,
    header: Header,
    payload: Payload,
}

/// What a participant believes the current call is.
#[derive(Clone, PartialEq, Debug)]
struct Header {
    seq: u64,
    op: Op,
    dt: DigitLayout,
    shape: Box<[usize]>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Op {
    Reduce(ReduceKind),
    Gather(usize),
}

impl Header {
    #[inline]
    fn same_call(&self, other: &Self) -> bool {
        self.seq == other.seq && self.op == other.op && self.dt == other.dt
    }

    fn verify(&self, theirs: &Self, src: usize) -> Result<(), CommError> {
        if self == theirs {
            Ok(())
        } else {
            Err(protocol_violation(format!(
                "replica {src} issued {theirs:?}, expected {self:?}"
            )))
        }
    }
}

enum Payload {
    Data(Blob),
    Shared(Arc<Blob>),
    /// Every contribution, by group position, travelling from the root.
    Pieces(Arc<[Blob]>),
    Failed(CommError),
}

impl From<Result<Blob, CommError>> for Payload {
    #[inline]
    fn from(value: Result<Blob, CommError>) -> Self {
        match value {
            Ok(blob) => Self::Data(blob),
            Err(e) => Self::Failed(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::InprocNode;
    use crate::{
        all_reduce::ReduceKind::{self, *},
        utils::{cast, cast_mut},
        CollectiveTransport, CommErrorKind, ReplicaGroups, TensorLayout,
    };
    use digit_layout::types::{F32, U32};
    use std::{thread, time::Duration};

    fn run<T: Send + 'static>(
        n: usize,
        f: impl Fn(InprocNode) -> T + Send + Sync + Clone + 'static,
    ) -> Vec<T> {
        InprocNode::new(n)
            .into_iter()
            .map(|node| {
                let f = f.clone();
                thread::spawn(move || f(node))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect()
    }

    fn reduce_u32(node: &InprocNode, kind: ReduceKind, values: &[u32]) -> Vec<u32> {
        let group = ReplicaGroups::flat(node.world_size()).unwrap();
        let layout = TensorLayout::new_contiguous(U32, &[values.len()]);
        let mut buf = crate::Blob::new(layout.nbytes());
        cast_mut::<u32>(&mut buf).copy_from_slice(values);
        node.all_reduce(&group.groups()[0], kind, &layout, &mut buf)
            .unwrap();
        cast::<u32>(&buf).to_vec()
    }

    #[test]
    fn test_reduce() {
        for n in [1, 2, 3, 4, 5, 8] {
            let results = run(n, |node| {
                let r = node.rank() as u32 + 1;
                [Sum, Mul, Min, Max, And, Or].map(|kind| reduce_u32(&node, kind, &[r, 2 * r]))
            });
            let ranks = (1..=n as u32).collect::<Vec<_>>();
            for [sum, mul, min, max, and, or] in results {
                assert_eq!(sum, [ranks.iter().sum::<u32>(), 2 * ranks.iter().sum::<u32>()]);
                assert_eq!(mul[0], ranks.iter().product::<u32>());
                assert_eq!(min, [1, 2]);
                assert_eq!(max, [n as u32, 2 * n as u32]);
                assert_eq!(and[0], ranks.iter().fold(!0, |a, b| a & b));
                assert_eq!(or[1], ranks.iter().fold(0, |a, b| a | (2 * b)));
            }
        }
    }

    #[test]
    fn test_gather() {
        let results = run(3, |node| {
            let group = ReplicaGroups::flat(3).unwrap();
            let layout = TensorLayout::new_contiguous(U32, &[2]);
            let mut buf = crate::Blob::new(8);
            let r = node.rank() as u32;
            cast_mut::<u32>(&mut buf).copy_from_slice(&[2 * r, 2 * r + 1]);
            node.all_gather(&group.groups()[0], &layout, 0, &buf)
                .unwrap()
                .iter()
                .flat_map(|piece| cast::<u32>(piece).to_vec())
                .collect::<Vec<_>>()
        });
        for pieces in results {
            assert_eq!(pieces, [0, 1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_disagreement() {
        let results = run(4, |node| {
            let group = ReplicaGroups::flat(4).unwrap();
            let group = &group.groups()[0];
            let len = if node.rank() == 3 { 3 } else { 2 };
            let layout = TensorLayout::new_contiguous(F32, &[len]);
            let mut buf = crate::Blob::new(layout.nbytes());
            let reduce = node
                .all_reduce(group, Sum, &layout, &mut buf)
                .map_err(|e| e.kind());
            let gather = node
                .all_gather(group, &layout, 0, &buf)
                .map(|_| ())
                .map_err(|e| e.kind());
            // the disagreement is reported everywhere and the nodes stay usable
            let ok = reduce_u32(&node, Sum, &[1]);
            (reduce, gather, ok, node.is_poisoned())
        });
        for (reduce, gather, ok, poisoned) in results {
            assert_eq!(reduce, Err(CommErrorKind::ProtocolViolation));
            assert_eq!(gather, Err(CommErrorKind::ShapeMismatch));
            assert_eq!(ok, [4]);
            assert!(!poisoned);
        }
    }

    #[test]
    fn test_timeout() {
        let nodes = InprocNode::with_timeout(2, Some(Duration::from_millis(50)));
        let group = ReplicaGroups::flat(2).unwrap();
        let layout = TensorLayout::new_contiguous(U32, &[1]);
        let mut buf = crate::Blob::new(4);

        let e = nodes[0]
            .all_reduce(&group.groups()[0], Sum, &layout, &mut buf)
            .unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::Timeout);
        assert!(nodes[0].is_poisoned());

        let e = nodes[0]
            .all_gather(&group.groups()[0], &layout, 0, &buf)
            .unwrap_err();
        assert_eq!(e.kind(), CommErrorKind::ProtocolViolation);
        assert!(!nodes[1].is_poisoned());
    }
}
