//! Outgoing request queue and container batching.

use std::collections::VecDeque;

use tgwire_tl_types::Identifiable;
use tgwire_tl_types::envelope::{Message, MessageContainer};

use crate::state::MtpState;

/// Something the packer can put on the wire.
pub trait Outgoing {
    /// Serialized body, constructor ID included.
    fn body(&self) -> &[u8];

    /// `false` for acks and other service messages that need no answer.
    fn content_related(&self) -> bool {
        true
    }

    /// Record where this item ended up in the last batch.
    fn assign(&mut self, msg_id: i64, container_id: Option<i64>);
}

/// One batch ready for [`MtpState::encrypt_message_data`].
#[derive(Debug)]
pub struct Packed<T> {
    /// `None` when nothing that was drained could be sent.
    pub data: Option<Vec<u8>>,
    /// Items inside `data`, in wire order, with their IDs assigned.
    pub items: Vec<T>,
    /// Items that do not fit in a container even on their own.
    pub oversized: Vec<T>,
    pub container_id: Option<i64>,
}

/// FIFO of requests waiting to be sent.
#[derive(Debug)]
pub struct MessagePacker<T> {
    queue: VecDeque<T>,
}

impl<T> Default for MessagePacker<T> {
    fn default() -> Self {
        Self { queue: VecDeque::new() }
    }
}

impl<T: Outgoing> MessagePacker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        self.queue.push_back(item);
    }

    /// Queue several items at once, e.g. every pending request after a
    /// reconnect. Relative order is kept.
    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        self.queue.extend(items);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take everything, e.g. to reject it all on disconnect.
    pub fn drain(&mut self) -> Vec<T> {
        self.queue.drain(..).collect()
    }

    /// Drain as many queued items as fit in one container.
    ///
    /// Returns `None` if the queue is empty. A single item is sent as is;
    /// several are wrapped in a `msg_container` with its own message ID.
    pub fn pack(&mut self, state: &mut MtpState) -> Option<Packed<T>> {
        if self.queue.is_empty() {
            return None;
        }

        let mut buffer = Vec::new();
        let mut items = Vec::new();
        let mut msg_ids = Vec::new();
        let mut oversized = Vec::new();
        let mut size = 0;

        while items.len() < MessageContainer::MAXIMUM_LENGTH {
            let Some(mut item) = self.queue.pop_front() else {
                break;
            };

            size += item.body().len() + Message::SIZE_OVERHEAD;
            if size <= MessageContainer::MAXIMUM_SIZE {
                let msg_id = state.write_data_as_message(&mut buffer, item.body(), item.content_related());
                item.assign(msg_id, None);
                msg_ids.push(msg_id);
                items.push(item);
                continue;
            }

            if !items.is_empty() {
                // Goes first in the next batch.
                self.queue.push_front(item);
                break;
            }

            log::warn!(
                "message payload of {} bytes is too long to ever be sent",
                item.body().len()
            );
            oversized.push(item);
            size = 0;
        }

        if items.is_empty() {
            return Some(Packed { data: None, items, oversized, container_id: None });
        }

        if items.len() == 1 {
            return Some(Packed { data: Some(buffer), items, oversized, container_id: None });
        }

        let mut body = Vec::with_capacity(8 + buffer.len());
        body.extend_from_slice(&MessageContainer::CONSTRUCTOR_ID.to_le_bytes());
        body.extend_from_slice(&(items.len() as i32).to_le_bytes());
        body.extend_from_slice(&buffer);

        let mut data = Vec::with_capacity(16 + body.len());
        let container_id = state.write_data_as_message(&mut data, &body, false);
        for (item, msg_id) in items.iter_mut().zip(msg_ids) {
            item.assign(msg_id, Some(container_id));
        }

        Some(Packed { data: Some(data), items, oversized, container_id: Some(container_id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Item {
        body: Vec<u8>,
        msg_id: Option<i64>,
        container_id: Option<i64>,
    }

    impl Item {
        fn new(len: usize) -> Self {
            Self { body: vec![0x42; len], msg_id: None, container_id: None }
        }
    }

    impl Outgoing for Item {
        fn body(&self) -> &[u8] {
            &self.body
        }

        fn assign(&mut self, msg_id: i64, container_id: Option<i64>) {
            self.msg_id = Some(msg_id);
            self.container_id = container_id;
        }
    }

    #[test]
    fn empty_queue_packs_nothing() {
        let mut packer = MessagePacker::<Item>::new();
        assert!(packer.pack(&mut MtpState::new(None, true)).is_none());
    }

    #[test]
    fn single_item_is_not_wrapped() {
        let mut state = MtpState::new(None, true);
        let mut packer = MessagePacker::new();
        packer.push(Item::new(16));

        let packed = packer.pack(&mut state).unwrap();
        let data = packed.data.unwrap();
        assert_eq!(data.len(), 16 + 16);
        assert_eq!(packed.container_id, None);
        assert_eq!(packed.items[0].msg_id.map(i64::to_le_bytes), Some(data[..8].try_into().unwrap()));
        assert!(packer.is_empty());
    }

    #[test]
    fn two_items_share_a_container() {
        let mut state = MtpState::new(None, true);
        let mut packer = MessagePacker::new();
        packer.push(Item::new(8));
        packer.push(Item::new(12));

        let packed = packer.pack(&mut state).unwrap();
        let container_id = packed.container_id.unwrap();
        let data = packed.data.unwrap();

        assert_eq!(&data[..8], &container_id.to_le_bytes());
        // Container seq_no is content-unrelated: after two requests it is 2 * 2.
        assert_eq!(&data[8..12], &4i32.to_le_bytes());
        assert_eq!(&data[16..20], &MessageContainer::CONSTRUCTOR_ID.to_le_bytes());
        assert_eq!(&data[20..24], &2i32.to_le_bytes());

        let ids: Vec<i64> = packed.items.iter().map(|i| i.msg_id.unwrap()).collect();
        assert!(ids[0] < ids[1] && ids[1] < container_id);
        assert!(packed.items.iter().all(|i| i.container_id == Some(container_id)));
    }

    #[test]
    fn count_limit_leaves_the_rest_queued() {
        let mut state = MtpState::new(None, true);
        let mut packer = MessagePacker::new();
        packer.extend((0..MessageContainer::MAXIMUM_LENGTH + 5).map(|_| Item::new(4)));

        let packed = packer.pack(&mut state).unwrap();
        assert_eq!(packed.items.len(), MessageContainer::MAXIMUM_LENGTH);
        assert_eq!(packer.len(), 5);
    }

    #[test]
    fn size_limit_keeps_the_overflowing_item_first() {
        let mut state = MtpState::new(None, true);
        let mut packer = MessagePacker::new();
        let half = MessageContainer::MAXIMUM_SIZE / 2;
        packer.push(Item::new(half));
        packer.push(Item::new(half));
        packer.push(Item::new(4));

        let packed = packer.pack(&mut state).unwrap();
        assert_eq!(packed.items.len(), 1);
        assert_eq!(packer.len(), 2);

        let packed = packer.pack(&mut state).unwrap();
        assert_eq!(packed.items.len(), 2);
        assert_eq!(packed.items[0].body.len(), half);
    }

    #[test]
    fn oversized_item_is_rejected_alone() {
        let mut state = MtpState::new(None, true);
        let mut packer = MessagePacker::new();
        packer.push(Item::new(MessageContainer::MAXIMUM_SIZE));
        packer.push(Item::new(4));

        let packed = packer.pack(&mut state).unwrap();
        assert_eq!(packed.oversized.len(), 1);
        assert_eq!(packed.items.len(), 1);
        assert_eq!(packed.items[0].body.len(), 4);
    }
}
