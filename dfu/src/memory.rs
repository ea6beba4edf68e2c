use nonempty::NonEmpty;
use regex::Regex;

/// Memory map a DfuSe bootloader advertises through its interface string
/// descriptor, e.g. `@Internal Flash  /0x08000000/16*128Kg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    pub name: String,
    pub segments: NonEmpty<MemorySegment>,
}

/// One run of equally-sized pages. `end` is exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemorySegment {
    start: u32,
    end: u32,
    page_size: u32,
    attrs: u8,
}

impl MemorySegment {
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn pages(&self) -> u32 {
        (self.end - self.start) / self.page_size
    }

    pub fn contains(&self, addr: u32) -> bool {
        (self.start..self.end).contains(&addr)
    }

    pub fn readable(&self) -> bool {
        self.attrs & 1 != 0
    }

    pub fn erasable(&self) -> bool {
        self.attrs & 2 != 0
    }

    pub fn writable(&self) -> bool {
        self.attrs & 4 != 0
    }
}

impl MemoryLayout {
    /// The segment holding `addr`, if any.
    pub fn segment_containing(&self, addr: u32) -> Option<&MemorySegment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    /// Page-aligned erase addresses covering `[start, end)`, restricted to
    /// erasable segments. The first page is aligned down so a start address
    /// inside a page still erases that whole page.
    pub fn page_addresses(&self, start: u32, end: u32) -> Vec<u32> {
        let mut pages = Vec::new();
        for seg in self.segments.iter().filter(|s| s.erasable()) {
            if seg.end <= start || seg.start >= end {
                continue;
            }
            let lo = start.max(seg.start);
            let hi = end.min(seg.end);
            let mut addr = seg.start + (lo - seg.start) / seg.page_size * seg.page_size;
            while addr < hi {
                pages.push(addr);
                addr += seg.page_size;
            }
        }
        pages
    }
}

/// Parse a DfuSe memory layout string: `@Name/0xADDR/pages*size[KMB]type`
/// segment runs, comma separated, laid out back to back from the base
/// address. Returns `None` when the descriptor doesn't follow the DfuSe
/// convention.
pub(crate) fn parse_memory_layout(desc: &str) -> Option<MemoryLayout> {
    let head = Regex::new(r"@?([^/]*?)\s*/0x([0-9a-fA-F]+)U?/(.*)").unwrap();
    let caps = head.captures(desc)?;
    let name = caps[1].to_string();
    let base = u32::from_str_radix(&caps[2], 16).ok()?;
    let runs = caps.get(3)?.as_str();

    let seg_re = Regex::new(r"(\d+)\*(\d+)([ KMB]?)([a-g])").unwrap();
    let mut segments = Vec::new();
    let mut addr = base;
    for seg in seg_re.captures_iter(runs) {
        let pages: u32 = seg[1].parse().ok()?;
        let size: u32 = seg[2].parse().ok()?;
        let page_size = match &seg[3] {
            "K" => size * 1024,
            "M" => size * 1024 * 1024,
            _ => size,
        };
        if pages == 0 || page_size == 0 {
            return None;
        }
        let end = addr + pages * page_size;
        segments.push(MemorySegment {
            start: addr,
            end,
            page_size,
            // type char encodes permissions: bit 0 read, bit 1 erase, bit 2 write
            attrs: seg[4].as_bytes()[0] & 7,
        });
        addr = end;
    }

    NonEmpty::from_vec(segments).map(|segments| MemoryLayout { name, segments })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_segment() {
        let layout = parse_memory_layout("@Internal Flash   /0x08000000/1*128Kg").unwrap();
        assert_eq!(layout.name, "Internal Flash");
        assert_eq!(layout.segments.len(), 1);
        let seg = layout.segments.first();
        assert_eq!(seg.start(), 0x08000000);
        assert_eq!(seg.end(), 0x08000000 + 128 * 1024);
        assert_eq!(seg.page_size(), 128 * 1024);
        assert!(seg.readable() && seg.erasable() && seg.writable());
    }

    #[test]
    fn test_parse_multi_segment() {
        let layout =
            parse_memory_layout("@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg")
                .unwrap();
        assert_eq!(layout.segments.len(), 3);
        let second = layout.segments[1];
        assert_eq!(second.start(), 0x08010000);
        assert_eq!(second.page_size(), 64 * 1024);
        assert_eq!(layout.segments[2].end(), 0x08000000 + 1024 * 1024);
    }

    #[test]
    fn test_parse_byte_sized_pages() {
        let layout = parse_memory_layout("@Option Bytes   /0x5200201C/01*128 e").unwrap();
        let seg = layout.segments.first();
        assert_eq!(seg.page_size(), 128);
        assert!(seg.readable() && seg.writable());
        assert!(!seg.erasable());
    }

    #[test]
    fn test_parse_rejects_non_dfuse_strings() {
        assert!(parse_memory_layout("DaisyGuitar DFU").is_none());
        assert!(parse_memory_layout("@Flash/0x08000000/").is_none());
    }

    #[test]
    fn test_segment_containing() {
        let layout = parse_memory_layout("@Internal Flash /0x08000000/8*08Kg").unwrap();
        assert!(layout.segment_containing(0x08000000).is_some());
        assert!(layout.segment_containing(0x0800FFFF).is_some());
        assert!(layout.segment_containing(0x08010000).is_none());
        assert!(layout.segment_containing(0x07FFFFFF).is_none());
    }

    #[test]
    fn test_page_addresses_cover_range() {
        let layout = parse_memory_layout("@Internal Flash /0x08000000/8*08Kg").unwrap();
        // 2500 bytes starting mid-page: the first page is aligned down.
        let pages = layout.page_addresses(0x08001000, 0x08001000 + 2500);
        assert_eq!(pages, vec![0x08000000]);

        let pages = layout.page_addresses(0x08000000, 0x08000000 + 3 * 8 * 1024 + 1);
        assert_eq!(
            pages,
            vec![0x08000000, 0x08002000, 0x08004000, 0x08006000]
        );
    }

    #[test]
    fn test_page_addresses_skip_unerasable() {
        let layout = parse_memory_layout("@Option Bytes   /0x5200201C/01*128 e").unwrap();
        assert!(layout.page_addresses(0x5200201C, 0x5200209C).is_empty());
    }
}
