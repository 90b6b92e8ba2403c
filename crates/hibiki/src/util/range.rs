/// Value of an outbound `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Everything from `offset` to the end of the resource.
    pub fn from_offset(offset: u64) -> Self {
        Self::new(offset, None)
    }

    pub fn to_http_range(&self) -> String {
        if let Some(length) = self.length {
            format!("bytes={}-{}", self.offset, self.offset + length - 1)
        } else {
            format!("bytes={}-", self.offset)
        }
    }
}

/// Value of a `Content-Range` header: `bytes start-end/size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

impl ContentRange {
    /// Range from `start` to the last byte of a resource of `size` bytes.
    pub fn to_end(start: u64, size: u64) -> Self {
        Self {
            start,
            end: size.saturating_sub(1),
            size,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, size) = value.split_once('/')?;
        let (start, end) = range.split_once('-')?;
        Some(Self {
            start: start.trim().parse().ok()?,
            end: end.trim().parse().ok()?,
            size: size.trim().parse().ok()?,
        })
    }

    pub fn to_header(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.size)
    }
}
