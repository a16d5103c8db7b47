// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Symbolic tag references and their compiled CIP request paths
//!
//! A Logix tag reference like `Program:Main.Motor[2].Status.3` is parsed
//! into a [`ParsedTag`] and then compiled into the IOI byte sequence the
//! Message Router expects: symbolic segments for names, element segments
//! for array indices.

use crate::error::Error;
use crate::value;
use byteorder::{ByteOrder, LittleEndian};

const SEGMENT_SYMBOLIC: u8 = 0x91;
const SEGMENT_ELEMENT_U8: u8 = 0x28;
const SEGMENT_ELEMENT_U16: u8 = 0x29;
const SEGMENT_ELEMENT_U32: u8 = 0x2A;

const PROGRAM_PREFIX: &str = "Program:";

/// A tag reference broken into its structural parts
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTag {
    /// First path segment after any program qualifier
    pub base_tag: String,
    /// Full `Program:<Name>` qualifier when the tag is program scoped
    pub program_name: Option<String>,
    /// Indices attached to the base tag, up to three dimensions
    pub array_indices: Vec<u32>,
    /// Member segments after the base tag, brackets kept verbatim
    pub members: Vec<String>,
    /// Trailing numeric segment addressing one bit of the value
    pub bit_index: Option<u8>,
}

impl ParsedTag {
    /// Parse a textual tag reference.
    ///
    /// The `Program:` keyword is matched case-insensitively; bracket
    /// suffixes take one to three comma-separated decimal indices; a
    /// terminal all-digit segment addresses a bit (0..=63) rather than
    /// naming a member.
    pub fn parse(name: &str) -> Result<ParsedTag, Error> {
        let mut segments = name.split('.').peekable();

        let first = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("empty tag name {:?}", name)))?;

        let is_program = first
            .get(..PROGRAM_PREFIX.len())
            .map_or(false, |p| p.eq_ignore_ascii_case(PROGRAM_PREFIX));
        let (program_name, base_segment) = if is_program {
            let base = segments
                .next()
                .ok_or_else(|| Error::InvalidInput(format!("program with no tag: {:?}", name)))?;
            (Some(first.to_string()), base)
        } else {
            (None, first)
        };

        let (base_tag, array_indices) = split_indices(base_segment)?;
        if base_tag.is_empty() {
            return Err(Error::InvalidInput(format!("empty base tag in {:?}", name)));
        }

        let mut members = Vec::new();
        let mut bit_index = None;
        while let Some(segment) = segments.next() {
            if segment.is_empty() {
                return Err(Error::InvalidInput(format!("empty segment in {:?}", name)));
            }
            let is_last = segments.peek().is_none();
            if is_last && segment.bytes().all(|b| b.is_ascii_digit()) {
                let bit: u8 = segment
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("bad bit index in {:?}", name)))?;
                if bit > 63 {
                    return Err(Error::InvalidInput(format!(
                        "bit index {} out of range in {:?}",
                        bit, name
                    )));
                }
                bit_index = Some(bit);
            } else {
                members.push(segment.to_string());
            }
        }

        Ok(ParsedTag {
            base_tag,
            program_name,
            array_indices,
            members,
            bit_index,
        })
    }

    /// Compile the reference into its IOI byte sequence.
    ///
    /// `data_type` matters only for DWORD, the backing storage of BOOL
    /// arrays: a single element segment of index/32 is emitted and the
    /// bit position is resolved after the read (or through a
    /// read-modify-write on writes).
    pub fn ioi(&self, data_type: Option<u8>) -> Result<Vec<u8>, Error> {
        let mut path = Vec::new();
        if let Some(program) = &self.program_name {
            symbolic_segment(&mut path, program)?;
        }
        symbolic_segment(&mut path, &self.base_tag)?;

        if data_type == Some(value::DWORD) && !self.array_indices.is_empty() {
            element_segment(&mut path, self.array_indices[0] / 32);
        } else {
            for &index in &self.array_indices {
                element_segment(&mut path, index);
            }
        }

        for member in &self.members {
            let (member_name, indices) = split_indices(member)?;
            symbolic_segment(&mut path, &member_name)?;
            for index in indices {
                element_segment(&mut path, index);
            }
        }
        Ok(path)
    }

    /// The reference without its program qualifier, array indices or
    /// bit suffix, used as the response tag name
    pub fn qualified_name(&self) -> String {
        match &self.program_name {
            Some(program) => format!("{}.{}", program, self.base_tag),
            None => self.base_tag.clone(),
        }
    }
}

/// Bit position of index `i` inside its backing DWORD
pub fn bit_within_dword(index: u32) -> u8 {
    (index % 32) as u8
}

// "Name[1,2]" -> ("Name", [1, 2])
fn split_indices(segment: &str) -> Result<(String, Vec<u32>), Error> {
    let open = match segment.find('[') {
        Some(i) => i,
        None => return Ok((segment.to_string(), Vec::new())),
    };
    if !segment.ends_with(']') {
        return Err(Error::InvalidInput(format!("unclosed bracket in {:?}", segment)));
    }
    let name = &segment[..open];
    let inner = &segment[open + 1..segment.len() - 1];
    let mut indices = Vec::new();
    for part in inner.split(',') {
        let index: u32 = part
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad array index in {:?}", segment)))?;
        indices.push(index);
    }
    if indices.is_empty() || indices.len() > 3 {
        return Err(Error::InvalidInput(format!(
            "expected 1 to 3 indices in {:?}",
            segment
        )));
    }
    Ok((name.to_string(), indices))
}

pub(crate) fn symbolic_segment(path: &mut Vec<u8>, name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > 255 || !name.is_ascii() {
        return Err(Error::InvalidInput(format!("bad segment name {:?}", name)));
    }
    path.push(SEGMENT_SYMBOLIC);
    path.push(name.len() as u8);
    path.extend_from_slice(name.as_bytes());
    if name.len() % 2 == 1 {
        path.push(0x00); // word alignment
    }
    Ok(())
}

// Minimal element encoding: 2, 4 or 6 bytes depending on the index
fn element_segment(path: &mut Vec<u8>, index: u32) {
    if index < 256 {
        path.push(SEGMENT_ELEMENT_U8);
        path.push(index as u8);
    } else if index < 65536 {
        path.push(SEGMENT_ELEMENT_U16);
        path.push(0x00);
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, index as u16);
        path.extend_from_slice(&b);
    } else {
        path.push(SEGMENT_ELEMENT_U32);
        path.push(0x00);
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, index);
        path.extend_from_slice(&b);
    }
}

/// One entry of the controller's symbol table
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Symbol name, qualified with its program when program scoped
    pub name: String,
    pub instance_id: u16,
    /// Low byte of the raw 16-bit symbol type
    pub symbol_type: u8,
    /// Low 12 bits of the raw symbol type
    pub data_type_value: u16,
    /// Number of dimensions, 0..=3
    pub array_dim: u8,
    pub is_struct: bool,
    /// Product of the declared dimension sizes, 0 for scalars
    pub element_count: u32,
}

// Substrings that mark internal symbols the walk discards
const TAG_NAME_FILTERS: &[&str] = &["__", "Routine:", "Map:", "Task:", "UDI:"];

/// Parse one GetInstanceAttributeList reply body (attributes 1, 2, 8).
///
/// Returns the surviving entries and the highest instance id seen, which
/// becomes the next walk cursor. Filtered entries still advance the
/// cursor.
pub(crate) fn parse_tag_list(data: &[u8], program: Option<&str>) -> Result<(Vec<Tag>, u32), Error> {
    let mut tags = Vec::new();
    let mut last_instance: u32 = 0;
    let mut offset = 0usize;

    while offset < data.len() {
        if data.len() - offset < 6 {
            return Err(Error::too_short("tag list entry"));
        }
        let instance = LittleEndian::read_u32(&data[offset..]);
        let name_len = LittleEndian::read_u16(&data[offset + 4..]) as usize;
        offset += 6;
        if data.len() - offset < name_len + 2 + 12 {
            return Err(Error::too_short("tag list entry"));
        }
        let raw_name = String::from_utf8_lossy(&data[offset..offset + name_len]).into_owned();
        offset += name_len;
        let symbol_type = LittleEndian::read_u16(&data[offset..]);
        offset += 2;
        let dims = [
            LittleEndian::read_u32(&data[offset..]),
            LittleEndian::read_u32(&data[offset + 4..]),
            LittleEndian::read_u32(&data[offset + 8..]),
        ];
        offset += 12;

        last_instance = last_instance.max(instance);

        if TAG_NAME_FILTERS.iter().any(|f| raw_name.contains(f)) {
            continue;
        }

        let name = match program {
            Some(program) => format!("{}.{}", program, raw_name),
            None => raw_name,
        };
        let array_dim = ((symbol_type & 0x6000) >> 13) as u8;
        let element_count = dims[..array_dim as usize].iter().product::<u32>()
            * (array_dim > 0) as u32;

        tags.push(Tag {
            name,
            instance_id: instance as u16,
            symbol_type: (symbol_type & 0xFF) as u8,
            data_type_value: symbol_type & 0x0FFF,
            array_dim,
            is_struct: symbol_type & 0x8000 != 0,
            element_count,
        });
    }
    Ok((tags, last_instance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_symbolic_segment() {
        let ioi = ParsedTag::parse("Test").unwrap().ioi(None).unwrap();
        assert_eq!(ioi, vec![0x91, 0x04, 0x54, 0x65, 0x73, 0x74]);
    }

    #[test]
    fn test_odd_length_name_is_padded() {
        let ioi = ParsedTag::parse("Tag").unwrap().ioi(None).unwrap();
        assert_eq!(ioi, vec![0x91, 0x03, 0x54, 0x61, 0x67, 0x00]);
    }

    #[test]
    fn test_element_segment_widths() {
        let ioi = ParsedTag::parse("Arr[5]").unwrap().ioi(None).unwrap();
        assert_eq!(ioi, vec![0x91, 0x03, 0x41, 0x72, 0x72, 0x00, 0x28, 0x05]);

        let ioi = ParsedTag::parse("Arr[500]").unwrap().ioi(None).unwrap();
        assert_eq!(
            ioi,
            vec![0x91, 0x03, 0x41, 0x72, 0x72, 0x00, 0x29, 0x00, 0xF4, 0x01]
        );

        let ioi = ParsedTag::parse("Arr[100000]").unwrap().ioi(None).unwrap();
        assert_eq!(
            ioi,
            vec![0x91, 0x03, 0x41, 0x72, 0x72, 0x00, 0x2A, 0x00, 0xA0, 0x86, 0x01, 0x00]
        );
    }

    #[test]
    fn test_boundary_index_values() {
        let parsed = ParsedTag::parse("A[255]").unwrap();
        assert_eq!(&parsed.ioi(None).unwrap()[4..], &[0x28, 0xFF]);
        let parsed = ParsedTag::parse("A[256]").unwrap();
        assert_eq!(&parsed.ioi(None).unwrap()[4..], &[0x29, 0x00, 0x00, 0x01]);
        let parsed = ParsedTag::parse("A[65536]").unwrap();
        assert_eq!(
            &parsed.ioi(None).unwrap()[4..],
            &[0x2A, 0x00, 0x00, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn test_bool_array_backing_compiles_dword_index() {
        let parsed = ParsedTag::parse("BoolArray[32]").unwrap();
        let ioi = parsed.ioi(Some(value::DWORD)).unwrap();
        // index 32 lands in DWORD 1
        assert_eq!(
            ioi,
            vec![0x91, 0x09, b'B', b'o', b'o', b'l', b'A', b'r', b'r', b'a', b'y', 0x00, 0x28, 0x01]
        );
        assert_eq!(bit_within_dword(32), 0);
        assert_eq!(bit_within_dword(35), 3);
    }

    #[test]
    fn test_bit_of_word_parse() {
        let parsed = ParsedTag::parse("MyDINT.5").unwrap();
        assert_eq!(parsed.base_tag, "MyDINT");
        assert_eq!(parsed.bit_index, Some(5));
        assert!(parsed.members.is_empty());

        let parsed = ParsedTag::parse("MyDINTArray[10].7").unwrap();
        assert_eq!(parsed.base_tag, "MyDINTArray");
        assert_eq!(parsed.array_indices, vec![10]);
        assert_eq!(parsed.bit_index, Some(7));
    }

    #[test]
    fn test_bit_index_out_of_range() {
        assert!(ParsedTag::parse("Tag.64").is_err());
        assert!(ParsedTag::parse("Tag.63").is_ok());
    }

    #[test]
    fn test_program_scoped_parse() {
        let parsed = ParsedTag::parse("Program:MainProgram.Count").unwrap();
        assert_eq!(parsed.program_name.as_deref(), Some("Program:MainProgram"));
        assert_eq!(parsed.base_tag, "Count");
        assert_eq!(parsed.qualified_name(), "Program:MainProgram.Count");

        // keyword match is case-insensitive
        let parsed = ParsedTag::parse("program:Main.Flag").unwrap();
        assert_eq!(parsed.program_name.as_deref(), Some("program:Main"));
    }

    #[test]
    fn test_program_ioi_leads_with_qualifier() {
        let ioi = ParsedTag::parse("Program:Main.Count")
            .unwrap()
            .ioi(None)
            .unwrap();
        let mut expected = vec![0x91, 0x0C];
        expected.extend_from_slice(b"Program:Main");
        expected.extend_from_slice(&[0x91, 0x05]);
        expected.extend_from_slice(b"Count");
        expected.push(0x00);
        assert_eq!(ioi, expected);
    }

    #[test]
    fn test_members_with_indices() {
        let parsed = ParsedTag::parse("Udt[1].Axis[2,3].Pos").unwrap();
        assert_eq!(parsed.base_tag, "Udt");
        assert_eq!(parsed.array_indices, vec![1]);
        assert_eq!(parsed.members, vec!["Axis[2,3]", "Pos"]);

        let ioi = parsed.ioi(None).unwrap();
        let mut expected = vec![0x91, 0x03];
        expected.extend_from_slice(b"Udt");
        expected.push(0x00);
        expected.extend_from_slice(&[0x28, 0x01]);
        expected.extend_from_slice(&[0x91, 0x04]);
        expected.extend_from_slice(b"Axis");
        expected.extend_from_slice(&[0x28, 0x02, 0x28, 0x03]);
        expected.extend_from_slice(&[0x91, 0x03]);
        expected.extend_from_slice(b"Pos");
        expected.push(0x00);
        assert_eq!(ioi, expected);
    }

    #[test]
    fn test_whitespace_around_indices() {
        let parsed = ParsedTag::parse("Grid[ 1 , 2 ]").unwrap();
        assert_eq!(parsed.array_indices, vec![1, 2]);
    }

    #[test]
    fn test_compiled_ioi_is_word_aligned() {
        for name in &[
            "Test",
            "Tag",
            "Arr[100000]",
            "Program:MainProgram.Counters[12]",
            "Udt[1].Axis[2,3].Pos",
            "a.b.c.d",
        ] {
            let ioi = ParsedTag::parse(name).unwrap().ioi(None).unwrap();
            assert_eq!(ioi.len() % 2, 0, "odd IOI for {}", name);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ParsedTag::parse("").is_err());
        assert!(ParsedTag::parse("Tag[").is_err());
        assert!(ParsedTag::parse("Tag[1,2,3,4]").is_err());
        assert!(ParsedTag::parse("Tag[x]").is_err());
        assert!(ParsedTag::parse("Program:Only").is_err());
    }

    fn entry(instance: u32, name: &str, symbol_type: u16, dims: [u32; 3]) -> Vec<u8> {
        let mut e = Vec::new();
        let mut b4 = [0u8; 4];
        LittleEndian::write_u32(&mut b4, instance);
        e.extend_from_slice(&b4);
        let mut b2 = [0u8; 2];
        LittleEndian::write_u16(&mut b2, name.len() as u16);
        e.extend_from_slice(&b2);
        e.extend_from_slice(name.as_bytes());
        LittleEndian::write_u16(&mut b2, symbol_type);
        e.extend_from_slice(&b2);
        for d in dims {
            LittleEndian::write_u32(&mut b4, d);
            e.extend_from_slice(&b4);
        }
        e
    }

    #[test]
    fn test_parse_tag_list() {
        let mut data = entry(0x10, "HeartBeat", 0x00C4, [0, 0, 0]);
        data.extend(entry(0x21, "Names", 0x8FCE | 0x2000, [8, 0, 0]));
        data.extend(entry(0x30, "__hidden", 0x00C4, [0, 0, 0]));

        let (tags, last) = parse_tag_list(&data, None).unwrap();
        assert_eq!(last, 0x30);
        assert_eq!(tags.len(), 2);

        assert_eq!(tags[0].name, "HeartBeat");
        assert_eq!(tags[0].instance_id, 0x10);
        assert_eq!(tags[0].data_type_value, 0x0C4);
        assert_eq!(tags[0].array_dim, 0);
        assert_eq!(tags[0].element_count, 0);
        assert!(!tags[0].is_struct);

        assert_eq!(tags[1].name, "Names");
        assert!(tags[1].is_struct);
        assert_eq!(tags[1].array_dim, 1);
        assert_eq!(tags[1].element_count, 8);
    }

    #[test]
    fn test_parse_tag_list_program_scope() {
        let data = entry(0x05, "Count", 0x00C4, [0, 0, 0]);
        let (tags, _) = parse_tag_list(&data, Some("Program:MainProgram")).unwrap();
        assert_eq!(tags[0].name, "Program:MainProgram.Count");
    }
}
