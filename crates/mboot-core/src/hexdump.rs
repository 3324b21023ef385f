//! Hex/ASCII dump of memory read back from a device
//!
//! ```text
//!   ADDRESS | 00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F | 0123456789ABCDEF
//!  -----------------------------------------------------------------------------
//!  00001000 | 00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F | ................
//!  -----------------------------------------------------------------------------
//! ```
//!
//! Rows are aligned to multiples of the row width. When the start address is
//! not aligned the first row is left-padded with blank columns. With
//! compression enabled, a run of rows identical to the row before them is
//! collapsed into a single ` *` line.

/// Maximum number of bytes per row
pub const MAX_WIDTH: usize = 16;

/// Marker line emitted in place of repeated rows
pub const REPEAT_MARKER: &str = " *";

/// One emitted data row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpLine {
    /// Address of the first column of the row (aligned to the row width)
    pub address: u64,
    /// Hex column text, left-padded for a partial first row
    pub hex_columns: String,
    /// ASCII column text, left-padded for a partial first row
    pub ascii_text: String,
}

/// A row of the dump body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpRow {
    /// Printed data row
    Line(DumpLine),
    /// Stand-in for one or more rows equal to the previous row
    Repeat,
}

/// Dump renderer settings
#[derive(Debug, Clone)]
pub struct HexDump {
    width: usize,
    compress: bool,
    placeholder: char,
}

impl Default for HexDump {
    fn default() -> Self {
        Self {
            width: MAX_WIDTH,
            compress: false,
            placeholder: '.',
        }
    }
}

impl HexDump {
    /// Renderer with 16 bytes per row, no compression and `.` placeholder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bytes per row, clamped to `1..=16`
    pub fn width(mut self, width: usize) -> Self {
        self.width = width.clamp(1, MAX_WIDTH);
        self
    }

    /// Collapse runs of repeated rows
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Character shown for non-printable bytes
    pub fn placeholder(mut self, placeholder: char) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Effective row width
    pub fn row_width(&self) -> usize {
        self.width
    }

    fn ascii(&self, byte: u8) -> char {
        if (0x20..0x7F).contains(&byte) {
            byte as char
        } else {
            self.placeholder
        }
    }

    fn line(&self, address: u64, pad: usize, bytes: &[u8]) -> DumpLine {
        let mut hex_columns = "   ".repeat(pad);
        let mut ascii_text = " ".repeat(pad);
        for &b in bytes {
            hex_columns.push_str(&format!("{:02X} ", b));
            ascii_text.push(self.ascii(b));
        }
        DumpLine {
            address,
            hex_columns,
            ascii_text,
        }
    }

    /// Split `data` into dump rows
    pub fn rows(&self, data: &[u8], start_address: u32) -> Vec<DumpRow> {
        let width = self.width;
        let offset = start_address as usize % width;
        let base = start_address as u64 - offset as u64;
        let mut rows = Vec::new();

        if data.is_empty() {
            return rows;
        }

        // Partial first row: padded, and never part of a repeat run
        let mut pos = 0;
        if offset > 0 {
            let take = (width - offset).min(data.len());
            rows.push(DumpRow::Line(self.line(base, offset, &data[..take])));
            pos = take;
        }

        let mut prev: Option<&[u8]> = None;
        let mut marked = false;
        while pos < data.len() {
            let end = (pos + width).min(data.len());
            let chunk = &data[pos..end];
            let address = base + (offset + pos) as u64;

            if self.compress && prev == Some(chunk) {
                if !marked {
                    rows.push(DumpRow::Repeat);
                    marked = true;
                }
            } else {
                prev = Some(chunk);
                marked = false;
                rows.push(DumpRow::Line(self.line(address, 0, chunk)));
            }
            pos = end;
        }

        rows
    }

    /// Header line and column ruler
    fn header(&self) -> String {
        let mut header = String::from("  ADDRESS | ");
        for i in 0..self.width {
            header.push_str(&format!("{:02X} ", i));
        }
        header.push_str("| ");
        for i in 0..self.width {
            header.push_str(&format!("{:X}", i));
        }
        header
    }

    fn rule(&self) -> String {
        format!(" {}", "-".repeat(13 + 4 * self.width))
    }

    /// Render `data` located at `start_address`
    ///
    /// Lines are separated by `\n`; there is no trailing newline.
    pub fn render(&self, data: &[u8], start_address: u32) -> String {
        let rule = self.rule();
        let mut out = vec![self.header(), rule.clone()];

        for row in self.rows(data, start_address) {
            match row {
                DumpRow::Line(line) => out.push(format!(
                    " {:08X} | {:<pad$}| {}",
                    line.address,
                    line.hex_columns,
                    line.ascii_text,
                    pad = self.width * 3
                )),
                DumpRow::Repeat => out.push(REPEAT_MARKER.to_string()),
            }
        }

        out.push(rule);
        out.join("\n")
    }
}

/// Render a hex dump with the default `.` placeholder
///
/// `width` is clamped to `1..=16`.
pub fn render(data: &[u8], start_address: u32, compress: bool, width: usize) -> String {
    HexDump::new()
        .width(width)
        .compress(compress)
        .render(data, start_address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_lines(dump: &str) -> Vec<&str> {
        // Skip header and the two rules
        let lines: Vec<&str> = dump.lines().collect();
        lines[2..lines.len() - 1].to_vec()
    }

    #[test]
    fn test_single_aligned_row() {
        let data: Vec<u8> = (0u8..16).collect();
        let dump = render(&data, 0x1000, false, 16);
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "  ADDRESS | 00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F | 0123456789ABCDEF"
        );
        assert_eq!(lines[1], format!(" {}", "-".repeat(77)));
        assert_eq!(
            lines[2],
            " 00001000 | 00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F | ................"
        );
        assert_eq!(lines[3], lines[1]);
    }

    #[test]
    fn test_empty_buffer() {
        let dump = render(&[], 0x20, true, 16);
        assert_eq!(dump.lines().count(), 3);
    }

    #[test]
    fn test_partial_first_row() {
        let dump = render(b"ABCDEF", 0x1003, false, 4);
        let rows = data_lines(&dump);
        let first = format!(" 00001000 | {}41 | {}A", " ".repeat(9), " ".repeat(3));
        let last = format!(" 00001008 | 46 {}| F", " ".repeat(9));
        assert_eq!(
            rows,
            vec![first.as_str(), " 00001004 | 42 43 44 45 | BCDE", last.as_str()]
        );
    }

    #[test]
    fn test_placeholder_and_printable_range() {
        let dump = HexDump::new()
            .width(4)
            .placeholder('?')
            .render(&[0x1F, 0x20, 0x7E, 0x7F], 0);
        assert!(dump.contains("| 1F 20 7E 7F | ? ~?"));
    }

    #[test]
    fn test_width_is_clamped() {
        assert_eq!(HexDump::new().width(0).row_width(), 1);
        assert_eq!(HexDump::new().width(64).row_width(), 16);
        let dump = render(&[0u8; 40], 0, false, 32);
        assert_eq!(data_lines(&dump).len(), 3);
    }

    #[test]
    fn test_row_count_without_compression() {
        for width in 1..=16usize {
            for start in [0u32, 1, 7, 15, 0x1003] {
                for len in [1usize, 5, 16, 17, 33, 100] {
                    let data = vec![0xAAu8; len];
                    let dump = render(&data, start, false, width);
                    let offset = start as usize % width;
                    let expected = (len + offset).div_ceil(width);
                    assert_eq!(
                        data_lines(&dump).len(),
                        expected,
                        "width {} start {} len {}",
                        width,
                        start,
                        len
                    );
                }
            }
        }
    }

    #[test]
    fn test_compression_marks_each_run_once() {
        let mut data = vec![0u8; 16 * 4];
        data.extend(vec![1u8; 16]);
        data.extend(vec![0u8; 16 * 2]);
        let dump = render(&data, 0, true, 16);
        let rows = data_lines(&dump);

        // zeros, *, ones, zeros, *
        assert_eq!(rows.len(), 5);
        assert!(rows[0].starts_with(" 00000000 |"));
        assert_eq!(rows[1], REPEAT_MARKER);
        assert!(rows[2].starts_with(" 00000040 |"));
        assert!(rows[3].starts_with(" 00000050 |"));
        assert_eq!(rows[4], REPEAT_MARKER);
    }

    #[test]
    fn test_no_marker_for_single_rows() {
        let data: Vec<u8> = (0u8..64).collect();
        let dump = render(&data, 0, true, 16);
        assert!(!dump.contains(REPEAT_MARKER));
        assert_eq!(data_lines(&dump).len(), 4);
    }

    #[test]
    fn test_partial_first_row_not_compressed() {
        // The padded first row holds the same bytes as the next, but is never
        // the baseline of a repeat run
        let data = vec![0xFFu8; 2 + 8 + 8];
        let hd = HexDump::new().width(8).compress(true);
        let rows = hd.rows(&data, 6);
        assert_eq!(rows.len(), 3);
        assert!(matches!(rows[0], DumpRow::Line(ref l) if l.address == 0));
        assert!(matches!(rows[1], DumpRow::Line(ref l) if l.address == 8));
        assert_eq!(rows[2], DumpRow::Repeat);
    }

    #[test]
    fn test_high_addresses() {
        let dump = render(&[0x55; 32], 0xFFFF_FFF0, false, 16);
        let rows = data_lines(&dump);
        assert!(rows[0].starts_with(" FFFFFFF0 |"));
        assert!(rows[1].starts_with(" 100000000 |"));
    }
}
