use bytes::{BufMut, Bytes, BytesMut};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Seconds covered by one shard bucket.
pub const BUCKET_SECS: i64 = 3600;

/// Builds the shard key for a metric at a point in time: the metric
/// identifier bytes followed by the big-endian hour bucket of `start_secs`.
pub fn shard_key(metric_key: &[u8], start_secs: i64) -> Bytes {
    let bucket = start_secs - start_secs.rem_euclid(BUCKET_SECS);
    let mut key = BytesMut::with_capacity(metric_key.len() + 4);
    key.put_slice(metric_key);
    key.put_u32(bucket as u32);
    key.freeze()
}

/// Get the partition number for a given key.
/// The same key always lands on the same partition.
///
/// # Arguments
/// * `key` - Shard key
/// * `num_partitions` - Total number of partitions (hosts)
///
/// # Returns
/// Partition number in range [0, num_partitions)
pub fn get_partition<K: Hash + ?Sized>(key: &K, num_partitions: usize) -> usize {
    if num_partitions == 0 {
        return 0;
    }

    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let hash = hasher.finish();

    (hash % num_partitions as u64) as usize
}
