use crate::constants as consts;
use crate::Error;

pub(crate) const MAGIC: &[u8; 2] = b"b2";
pub(crate) const VERSION: u8 = 1;

/// The fixed 40 bytes header at the start of every chunk.
///
/// Layout (little endian):
/// ```text
/// [0..2]   magic "b2"          [2] version      [3] flags
/// [4]      typesize            [5] codec id     [6] codec meta   [7] clevel
/// [8..12]  nbytes              [12..16] cbytes
/// [16..20] blocksize           [20..24] nblocks
/// [24..30] filter ids          [30..36] filter metas
/// [36..40] reserved
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
    pub flags: u8,
    pub typesize: u8,
    pub codec: u8,
    pub codec_meta: u8,
    pub clevel: u8,
    pub nbytes: usize,
    pub cbytes: usize,
    pub blocksize: usize,
    pub nblocks: usize,
    pub filters: [u8; consts::MAX_FILTERS],
    pub filters_meta: [u8; consts::MAX_FILTERS],
}
impl ChunkHeader {
    pub fn special(&self) -> u8 {
        self.flags & consts::SPECIAL_MASK
    }
    pub fn is_split(&self) -> bool {
        self.flags & consts::CHUNK_SPLIT != 0
    }
    pub fn is_memcpyed(&self) -> bool {
        self.flags & consts::CHUNK_MEMCPYED != 0
    }
    pub fn has_dict(&self) -> bool {
        self.flags & consts::CHUNK_USEDICT != 0
    }

    pub fn host_flags() -> u8 {
        if cfg!(target_endian = "big") {
            consts::CHUNK_BIGENDIAN
        } else {
            0
        }
    }

    pub fn write(&self, dst: &mut [u8]) {
        debug_assert!(dst.len() >= consts::CHUNK_HEADER_LEN);
        dst[0..2].copy_from_slice(MAGIC);
        dst[2] = VERSION;
        dst[3] = self.flags;
        dst[4] = self.typesize;
        dst[5] = self.codec;
        dst[6] = self.codec_meta;
        dst[7] = self.clevel;
        dst[8..12].copy_from_slice(&(self.nbytes as u32).to_le_bytes());
        dst[12..16].copy_from_slice(&(self.cbytes as u32).to_le_bytes());
        dst[16..20].copy_from_slice(&(self.blocksize as u32).to_le_bytes());
        dst[20..24].copy_from_slice(&(self.nblocks as u32).to_le_bytes());
        dst[24..30].copy_from_slice(&self.filters);
        dst[30..36].copy_from_slice(&self.filters_meta);
        dst[36..40].fill(0);
    }

    pub fn to_bytes(&self) -> [u8; consts::CHUNK_HEADER_LEN] {
        let mut buf = [0; consts::CHUNK_HEADER_LEN];
        self.write(&mut buf);
        buf
    }

    /// Parse and validate the header of a chunk.
    ///
    /// The buffer must contain at least the `cbytes` bytes declared by the header.
    pub fn read(src: &[u8]) -> Result<Self, Error> {
        if src.len() < consts::CHUNK_HEADER_LEN {
            return Err(Error::corrupt_chunk(format!(
                "buffer of {} bytes is shorter than the header",
                src.len()
            )));
        }
        if &src[0..2] != MAGIC {
            return Err(Error::corrupt_chunk("bad magic"));
        }
        if src[2] != VERSION {
            return Err(Error::corrupt_chunk(format!("unsupported version {}", src[2])));
        }
        let u32_at = |i: usize| u32::from_le_bytes([src[i], src[i + 1], src[i + 2], src[i + 3]]) as usize;
        let mut filters = [0; consts::MAX_FILTERS];
        filters.copy_from_slice(&src[24..30]);
        let mut filters_meta = [0; consts::MAX_FILTERS];
        filters_meta.copy_from_slice(&src[30..36]);
        let header = ChunkHeader {
            flags: src[3],
            typesize: src[4],
            codec: src[5],
            codec_meta: src[6],
            clevel: src[7],
            nbytes: u32_at(8),
            cbytes: u32_at(12),
            blocksize: u32_at(16),
            nblocks: u32_at(20),
            filters,
            filters_meta,
        };
        header.validate(src.len())?;
        Ok(header)
    }

    fn validate(&self, buf_len: usize) -> Result<(), Error> {
        if self.typesize == 0 {
            return Err(Error::corrupt_chunk("typesize is zero"));
        }
        if self.cbytes < consts::CHUNK_HEADER_LEN || self.cbytes > buf_len {
            return Err(Error::corrupt_chunk(format!(
                "cbytes {} is not in range [{}, {}]",
                self.cbytes,
                consts::CHUNK_HEADER_LEN,
                buf_len
            )));
        }
        if self.nbytes > consts::MAX_BUFFERSIZE {
            return Err(Error::corrupt_chunk(format!(
                "nbytes {} exceeds the maximum buffer size {}",
                self.nbytes,
                consts::MAX_BUFFERSIZE
            )));
        }
        match self.special() {
            consts::NO_SPECIAL => {}
            consts::SPECIAL_ZERO | consts::SPECIAL_NAN | consts::SPECIAL_UNINIT => {
                return Ok(());
            }
            consts::SPECIAL_VALUE => {
                if self.cbytes != consts::CHUNK_HEADER_LEN + self.typesize as usize {
                    return Err(Error::corrupt_chunk("value chunk of unexpected size"));
                }
                return Ok(());
            }
            special => {
                return Err(Error::corrupt_chunk(format!("unknown special kind {special}")));
            }
        }
        if self.is_memcpyed() {
            if self.cbytes != consts::CHUNK_HEADER_LEN + self.nbytes {
                return Err(Error::corrupt_chunk(format!(
                    "memcpyed chunk of {} bytes has cbytes {}",
                    self.nbytes, self.cbytes
                )));
            }
            return Ok(());
        }
        if self.nbytes == 0 {
            return Err(Error::corrupt_chunk("compressed chunk without data"));
        }
        if self.blocksize == 0 || self.nblocks != self.nbytes.div_ceil(self.blocksize) {
            return Err(Error::corrupt_chunk(format!(
                "{} blocks of {} bytes do not match nbytes {}",
                self.nblocks, self.blocksize, self.nbytes
            )));
        }
        if !self.is_split() && self.nblocks != 1 {
            return Err(Error::corrupt_chunk("unsplit chunk with multiple blocks"));
        }
        Ok(())
    }
}

/// Get the uncompressed size, the compressed size and the block size of a chunk.
pub fn chunk_sizes(src: &[u8]) -> Result<(usize, usize, usize), Error> {
    let header = ChunkHeader::read(src)?;
    Ok((header.nbytes, header.cbytes, header.blocksize))
}

#[cfg(test)]
mod tests {
    use super::ChunkHeader;
    use crate::constants as consts;
    use crate::Error;

    fn header() -> ChunkHeader {
        ChunkHeader {
            flags: consts::CHUNK_SPLIT,
            typesize: 8,
            codec: consts::LZ4,
            codec_meta: 0,
            clevel: 5,
            nbytes: 1000,
            cbytes: 100,
            blocksize: 256,
            nblocks: 4,
            filters: [1, 3, 0, 0, 0, 0],
            filters_meta: [0; 6],
        }
    }

    #[test]
    fn layout() {
        let mut buf = header().to_bytes().to_vec();
        assert_eq!(b"b2", &buf[0..2]);
        assert_eq!(1, buf[2]);
        assert_eq!(consts::CHUNK_SPLIT, buf[3]);
        assert_eq!(8, buf[4]);
        assert_eq!(consts::LZ4, buf[5]);
        assert_eq!(1000u32.to_le_bytes(), buf[8..12]);
        assert_eq!(100u32.to_le_bytes(), buf[12..16]);
        assert_eq!(4u32.to_le_bytes(), buf[20..24]);
        assert_eq!([1, 3, 0, 0, 0, 0], buf[24..30]);

        buf.resize(100, 0);
        assert_eq!(header(), ChunkHeader::read(&buf).unwrap());
    }

    #[test]
    fn corrupt_headers() {
        let mut buf = header().to_bytes().to_vec();
        buf.resize(100, 0);

        assert!(matches!(ChunkHeader::read(&buf[..30]), Err(Error::CorruptChunk(_))));
        assert!(matches!(ChunkHeader::read(&buf[..99]), Err(Error::CorruptChunk(_))));

        let mut bad = buf.clone();
        bad[0] = b'x';
        assert!(matches!(ChunkHeader::read(&bad), Err(Error::CorruptChunk(_))));

        let mut bad = buf.clone();
        bad[2] = 9;
        assert!(matches!(ChunkHeader::read(&bad), Err(Error::CorruptChunk(_))));

        let mut bad = buf.clone();
        bad[20..24].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(ChunkHeader::read(&bad), Err(Error::CorruptChunk(_))));

        let mut bad = buf.clone();
        bad[3] = 0x6;
        assert!(matches!(ChunkHeader::read(&bad), Err(Error::CorruptChunk(_))));
    }

    #[test]
    fn oversized_special() {
        let mut zeros = ChunkHeader {
            flags: consts::SPECIAL_ZERO,
            cbytes: consts::CHUNK_HEADER_LEN,
            blocksize: 0,
            nblocks: 0,
            filters: [0; 6],
            ..header()
        };
        zeros.nbytes = consts::MAX_BUFFERSIZE;
        assert!(ChunkHeader::read(&zeros.to_bytes()).is_ok());

        let mut buf = zeros.to_bytes();
        buf[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(ChunkHeader::read(&buf), Err(Error::CorruptChunk(_))));
        assert!(matches!(
            crate::chunk::Decoder::new(crate::DParams::default())
                .unwrap()
                .decompress(&buf),
            Err(Error::CorruptChunk(_))
        ));
    }
}
