use crate::error::AuctionError;
use ahash::AHashMap;
use tracing::trace;

/// Partition assignment for one named group on one topic.
///
/// Partitions are spread round-robin over the members ordered by ID and
/// reassigned whenever a member joins or leaves. Each reassignment bumps the
/// generation so members know to reload their cursors.
#[derive(Debug)]
pub struct ConsumerGroup {
    pub topic: String,
    pub name: String,
    pub partitions_count: u32,
    generation: u64,
    members: AHashMap<u32, ConsumerGroupMember>,
}

#[derive(Debug)]
pub struct ConsumerGroupMember {
    pub id: u32,
    partitions: Vec<u32>,
    current_partition_index: usize,
}

impl ConsumerGroup {
    pub fn new(topic: &str, name: &str, partitions_count: u32) -> ConsumerGroup {
        ConsumerGroup {
            topic: topic.to_string(),
            name: name.to_string(),
            partitions_count,
            generation: 0,
            members: AHashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn members_count(&self) -> usize {
        self.members.len()
    }

    pub fn get_member_partitions(&self, member_id: u32) -> Result<Vec<u32>, AuctionError> {
        self.members
            .get(&member_id)
            .map(|member| member.partitions.clone())
            .ok_or_else(|| AuctionError::ConsumerGroupMemberNotFound(member_id, self.name.clone()))
    }

    /// Member's partitions in polling order; the starting point rotates on every call.
    pub fn calculate_partition_ids(&mut self, member_id: u32) -> Result<Vec<u32>, AuctionError> {
        let Some(member) = self.members.get_mut(&member_id) else {
            return Err(AuctionError::ConsumerGroupMemberNotFound(
                member_id,
                self.name.clone(),
            ));
        };
        Ok(member.calculate_partition_ids())
    }

    pub fn add_member(&mut self, member_id: u32) {
        self.members.insert(
            member_id,
            ConsumerGroupMember {
                id: member_id,
                partitions: Vec::new(),
                current_partition_index: 0,
            },
        );
        trace!(
            "Added member with ID: {} to consumer group: {} for topic: {}",
            member_id,
            self.name,
            self.topic
        );
        self.assign_partitions();
    }

    pub fn delete_member(&mut self, member_id: u32) -> bool {
        if self.members.remove(&member_id).is_none() {
            return false;
        }

        trace!(
            "Deleted member with ID: {} in consumer group: {} for topic: {}",
            member_id,
            self.name,
            self.topic
        );
        self.assign_partitions();
        true
    }

    fn assign_partitions(&mut self) {
        self.generation += 1;
        let mut member_ids = self.members.keys().copied().collect::<Vec<_>>();
        if member_ids.is_empty() {
            return;
        }

        member_ids.sort_unstable();
        for member in self.members.values_mut() {
            member.partitions.clear();
            member.current_partition_index = 0;
        }

        let members_count = member_ids.len() as u32;
        for partition_index in 0..self.partitions_count {
            let partition_id = partition_index + 1;
            let member_id = member_ids[(partition_index % members_count) as usize];
            if let Some(member) = self.members.get_mut(&member_id) {
                member.partitions.push(partition_id);
                trace!(
                    "Assigned partition ID: {} to member with ID: {} for topic: {} in consumer group: {}",
                    partition_id,
                    member_id,
                    self.topic,
                    self.name
                );
            }
        }
    }
}

impl ConsumerGroupMember {
    fn calculate_partition_ids(&mut self) -> Vec<u32> {
        if self.partitions.is_empty() {
            return Vec::new();
        }

        let start = self.current_partition_index % self.partitions.len();
        self.current_partition_index = (start + 1) % self.partitions.len();
        self.partitions[start..]
            .iter()
            .chain(self.partitions[..start].iter())
            .copied()
            .collect()
    }
}
