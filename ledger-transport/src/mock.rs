// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory transport.
//!
//! Every call to [`Exchange::exchange`] pops the next scripted reply and records the
//! serialized command, so upper layers can be tested without a device attached.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Mutex;

use async_trait::async_trait;
use ledger_apdu::{APDUAnswer, APDUCommand};
use thiserror::Error;

use crate::Exchange;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MockTransportError {
    /// The script ran out of replies
    #[error("mock transport: no scripted answer left")]
    Exhausted,
    /// A scripted failure, e.g. an unplugged device
    #[error("{0}")]
    Scripted(String),
    /// A scripted reply shorter than a status word
    #[error("mock transport: response was too short")]
    TooShort,
}

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Payload followed by a status word
    Answer { data: Vec<u8>, status: u16 },
    /// Transport level failure
    Fail(String),
}

impl MockReply {
    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        MockReply::Answer {
            data: data.into(),
            status: 0x9000,
        }
    }

    pub fn status(status: u16) -> Self {
        MockReply::Answer {
            data: Vec::new(),
            status,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: Mutex<bool>,
}

impl MockTransport {
    pub fn new(replies: impl IntoIterator<Item = MockReply>) -> Self {
        MockTransport {
            replies: Mutex::new(replies.into_iter().collect()),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        }
    }

    /// Queue another reply at the end of the script
    pub fn push(&self, reply: MockReply) {
        self.replies.lock().expect("mock poisoned").push_back(reply);
    }

    /// Serialized commands sent so far, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().expect("mock poisoned").clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("mock poisoned").len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().expect("mock poisoned")
    }
}

#[async_trait]
impl Exchange for MockTransport {
    type Error = MockTransportError;
    type AnswerType = Vec<u8>;

    async fn exchange<I>(
        &self,
        command: &APDUCommand<I>,
    ) -> Result<APDUAnswer<Self::AnswerType>, Self::Error>
    where
        I: Deref<Target = [u8]> + Send + Sync,
    {
        self.sent
            .lock()
            .expect("mock poisoned")
            .push(command.serialize());

        let reply = self
            .replies
            .lock()
            .expect("mock poisoned")
            .pop_front()
            .ok_or(MockTransportError::Exhausted)?;

        match reply {
            MockReply::Answer { mut data, status } => {
                data.extend_from_slice(&status.to_be_bytes());
                APDUAnswer::from_answer(data).map_err(|_| MockTransportError::TooShort)
            }
            MockReply::Fail(message) => Err(MockTransportError::Scripted(message)),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        *self.closed.lock().expect("mock poisoned") = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_in_order() {
        let transport = MockTransport::new([MockReply::ok(vec![0x01]), MockReply::status(0x6985)]);
        let command = APDUCommand {
            cla: 0xE0,
            ins: 0x02,
            p1: 0x00,
            p2: 0x00,
            data: vec![0xAA],
        };

        let first = transport.exchange(&command).await.unwrap();
        assert_eq!(first.data(), &[0x01]);
        assert_eq!(first.retcode(), 0x9000);

        let second = transport.exchange(&command).await.unwrap();
        assert_eq!(second.retcode(), 0x6985);

        assert_eq!(
            transport.exchange(&command).await.unwrap_err(),
            MockTransportError::Exhausted
        );
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(transport.sent()[0], vec![0xE0, 0x02, 0x00, 0x00, 0x01, 0xAA]);
    }

    #[tokio::test]
    async fn close_is_recorded() {
        let transport = MockTransport::default();
        assert!(!transport.is_closed());
        transport.close().await.unwrap();
        assert!(transport.is_closed());
    }
}
