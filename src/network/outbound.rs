// Copyright 2025 pebblemq contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Write};

use bytes::Bytes;

use crate::service::BrokerResult;

/// One pending outbound message plus its transmission progress.
///
/// The payload is fully built before enqueueing and owned by the queue until
/// the moment every byte has gone out, at which point the envelope is
/// released. `bytes_sent` only ever grows and never passes the payload
/// length.
#[derive(Debug)]
pub struct Envelope {
    payload: Bytes,
    bytes_sent: usize,
}

impl Envelope {
    fn new(payload: Bytes) -> Envelope {
        Envelope {
            payload,
            bytes_sent: 0,
        }
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    fn is_sent(&self) -> bool {
        self.bytes_sent == self.payload.len()
    }
}

/// Outcome of a send attempt on the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// The head envelope went out completely and was released.
    Sent,
    /// The transport would block; resume on the next writability event.
    Blocked,
    /// Nothing left to send.
    Empty,
}

/// Per-connection FIFO of pending outbound messages.
///
/// Envelopes are transmitted strictly in enqueue order; a partial write
/// leaves the head envelope in place with its progress recorded so the next
/// writability event resumes mid-payload.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    envelopes: VecDeque<Envelope>,
}

impl OutboundQueue {
    pub fn new() -> OutboundQueue {
        OutboundQueue {
            envelopes: VecDeque::new(),
        }
    }

    /// Appends a fully built payload to the tail of the queue.
    pub fn enqueue(&mut self, payload: Bytes) {
        self.envelopes.push_back(Envelope::new(payload));
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Writes the unsent tail of the head envelope into `writer`.
    ///
    /// Interrupted writes are retried in place; a would-block leaves the
    /// envelope queued with its progress recorded. Any other write failure
    /// propagates and the caller is expected to tear the connection down.
    pub fn drain_one(&mut self, writer: &mut impl Write) -> BrokerResult<SendState> {
        let Some(envelope) = self.envelopes.front_mut() else {
            return Ok(SendState::Empty);
        };
        while !envelope.is_sent() {
            match writer.write(&envelope.payload[envelope.bytes_sent..]) {
                Ok(0) => {
                    return Err(
                        io::Error::new(ErrorKind::WriteZero, "transport accepted no bytes").into(),
                    );
                }
                Ok(n) => envelope.bytes_sent += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(SendState::Blocked),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.envelopes.pop_front();
        Ok(SendState::Sent)
    }

    /// Sends envelopes until the queue empties or the transport blocks.
    pub fn drain(&mut self, writer: &mut impl Write) -> BrokerResult<SendState> {
        loop {
            match self.drain_one(writer)? {
                SendState::Sent => continue,
                state => return Ok(state),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::BrokerError;

    enum Step {
        Accept(usize),
        Block,
        Interrupt,
        Fail,
    }

    struct ScriptedWriter {
        script: VecDeque<Step>,
        written: Vec<u8>,
    }

    impl ScriptedWriter {
        fn new(script: Vec<Step>) -> ScriptedWriter {
            ScriptedWriter {
                script: script.into(),
                written: Vec::new(),
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            assert!(!buf.is_empty(), "queue attempted an empty write");
            match self.script.pop_front().unwrap_or(Step::Accept(usize::MAX)) {
                Step::Accept(n) => {
                    let n = n.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Step::Block => Err(ErrorKind::WouldBlock.into()),
                Step::Interrupt => Err(ErrorKind::Interrupted.into()),
                Step::Fail => Err(ErrorKind::BrokenPipe.into()),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn three_envelope_queue() -> OutboundQueue {
        let mut queue = OutboundQueue::new();
        queue.enqueue(Bytes::from_static(b"first-envelope"));
        queue.enqueue(Bytes::from_static(b"second"));
        queue.enqueue(Bytes::from_static(b"third-and-last"));
        queue
    }

    #[test]
    fn test_empty_queue_reports_empty() {
        let mut queue = OutboundQueue::new();
        let mut writer = ScriptedWriter::new(vec![]);
        assert_eq!(queue.drain_one(&mut writer).unwrap(), SendState::Empty);
    }

    #[test]
    fn test_fifo_order_under_would_block_injection() {
        // blocks injected at arbitrary points must never reorder bytes
        let mut queue = three_envelope_queue();
        let mut writer = ScriptedWriter::new(vec![
            Step::Accept(3),
            Step::Block,
            Step::Accept(1),
            Step::Interrupt,
            Step::Accept(10),
            Step::Block,
            Step::Block,
            Step::Accept(4),
            Step::Accept(2),
            Step::Accept(usize::MAX),
            Step::Accept(usize::MAX),
        ]);

        let mut rounds = 0;
        loop {
            match queue.drain(&mut writer).unwrap() {
                SendState::Empty => break,
                SendState::Blocked => rounds += 1,
                SendState::Sent => unreachable!("drain loops past Sent"),
            }
            assert!(rounds < 32, "drain failed to make progress");
        }
        assert_eq!(writer.written, b"first-envelopesecondthird-and-last");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_write_resumes_mid_payload() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(Bytes::from_static(b"abcdefgh"));

        let mut writer = ScriptedWriter::new(vec![Step::Accept(3), Step::Block]);
        assert_eq!(queue.drain_one(&mut writer).unwrap(), SendState::Blocked);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.envelopes[0].bytes_sent(), 3);

        let mut writer2 = ScriptedWriter::new(vec![Step::Accept(usize::MAX)]);
        assert_eq!(queue.drain_one(&mut writer2).unwrap(), SendState::Sent);
        assert_eq!(writer2.written, b"defgh");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_bytes_sent_never_exceeds_payload() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(Bytes::from_static(b"0123456789"));
        let mut writer = ScriptedWriter::new(vec![
            Step::Accept(4),
            Step::Block,
            Step::Accept(4),
            Step::Block,
            Step::Accept(4),
        ]);
        while queue.drain(&mut writer).unwrap() != SendState::Empty {
            for envelope in &queue.envelopes {
                assert!(envelope.bytes_sent() <= envelope.len());
            }
        }
        assert_eq!(writer.written, b"0123456789");
    }

    #[test]
    fn test_write_error_propagates() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(Bytes::from_static(b"doomed"));
        let mut writer = ScriptedWriter::new(vec![Step::Accept(2), Step::Fail]);
        let result = queue.drain_one(&mut writer);
        assert!(matches!(result, Err(BrokerError::Io(_))));
    }

    #[test]
    fn test_zero_length_write_is_an_error() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(Bytes::from_static(b"x"));
        let mut writer = ScriptedWriter::new(vec![Step::Accept(0)]);
        assert!(queue.drain_one(&mut writer).is_err());
    }
}
