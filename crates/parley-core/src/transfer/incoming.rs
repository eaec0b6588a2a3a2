use crate::error::TransferError;

/// Receiving side of one file transfer. Chunks may arrive at any position
/// and may repeat; progress counts each byte once.
#[derive(Debug)]
pub struct IncomingFile {
    name: String,
    buffer: Vec<u8>,
    /// Sorted, non-overlapping `[start, end)` ranges already written.
    covered: Vec<(u64, u64)>,
}

impl IncomingFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            buffer: vec![0; size as usize],
            covered: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn write(&mut self, position: u64, data: &[u8]) -> Result<(), TransferError> {
        let end = position.saturating_add(data.len() as u64);
        if end > self.size() {
            return Err(TransferError::OutOfRange {
                position,
                end,
                size: self.size(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        self.buffer[position as usize..end as usize].copy_from_slice(data);
        self.cover(position, end);
        Ok(())
    }

    fn cover(&mut self, start: u64, end: u64) {
        let (mut start, mut end) = (start, end);
        let mut merged = Vec::with_capacity(self.covered.len() + 1);
        for &(s, e) in &self.covered {
            if e < start || s > end {
                merged.push((s, e));
            } else {
                start = start.min(s);
                end = end.max(e);
            }
        }
        merged.push((start, end));
        merged.sort_unstable();
        self.covered = merged;
    }

    pub fn received(&self) -> u64 {
        self.covered.iter().map(|(s, e)| e - s).sum()
    }

    pub fn progress(&self) -> u8 {
        if self.size() == 0 {
            return 100;
        }
        percent(self.received(), self.size())
    }

    pub fn is_complete(&self) -> bool {
        self.received() == self.size()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// `done / total` as a rounded percentage, capped at 100.
pub(crate) fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let value = (done as f64 / total as f64 * 100.0).round();
    value.min(100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(4096, 10_000), 41);
        assert_eq!(percent(8192, 10_000), 82);
        assert_eq!(percent(10_000, 10_000), 100);
        assert_eq!(percent(20_000, 10_000), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_out_of_order_chunks() {
        let mut file = IncomingFile::new("a.parcel", 10);
        file.write(5, b"56789").unwrap();
        assert_eq!(file.progress(), 50);
        assert!(!file.is_complete());

        file.write(0, b"01234").unwrap();
        assert!(file.is_complete());
        assert_eq!(file.into_bytes(), b"0123456789");
    }

    #[test]
    fn test_repeated_chunk_counted_once() {
        let mut file = IncomingFile::new("a.parcel", 8);
        file.write(0, b"abcd").unwrap();
        file.write(2, b"cdef").unwrap();
        file.write(0, b"abcd").unwrap();
        assert_eq!(file.received(), 6);
        assert_eq!(file.progress(), 75);
    }

    #[test]
    fn test_chunk_past_end_rejected() {
        let mut file = IncomingFile::new("a.parcel", 4);
        assert!(matches!(
            file.write(2, b"xyz"),
            Err(TransferError::OutOfRange { end: 5, size: 4, .. })
        ));
        assert_eq!(file.received(), 0);
    }
}
