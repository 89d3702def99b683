use prost::bytes;

use crate::types::{Cell, TableRow};

/// A [`TableRow`] encoded as a protobuf message for the Storage Write API.
///
/// Field numbers follow the column order of the table, starting at 1, matching the
/// descriptor built by [`super::client::BigQueryClient::table_descriptor`]. Null cells are
/// omitted from the message.
#[derive(Debug)]
pub struct BigQueryTableRow(pub TableRow);

impl prost::Message for BigQueryTableRow {
    fn encode_raw(&self, buf: &mut impl bytes::BufMut)
    where
        Self: Sized,
    {
        for (tag, cell) in (1..).zip(self.0.values()) {
            cell_encode_prost(cell, tag, buf);
        }
    }

    fn merge_field(
        &mut self,
        _tag: u32,
        _wire_type: prost::encoding::WireType,
        _buf: &mut impl bytes::Buf,
        _ctx: prost::encoding::DecodeContext,
    ) -> Result<(), prost::DecodeError>
    where
        Self: Sized,
    {
        unimplemented!("rows are never decoded from the storage write api");
    }

    fn encoded_len(&self) -> usize {
        (1..)
            .zip(self.0.values())
            .map(|(tag, cell)| cell_encoded_len_prost(cell, tag))
            .sum()
    }

    fn clear(&mut self) {
        self.0 = TableRow::default();
    }
}

pub fn cell_encode_prost(cell: &Cell, tag: u32, buf: &mut impl bytes::BufMut) {
    match cell {
        Cell::Null => {}
        Cell::I64(i) => prost::encoding::int64::encode(tag, i, buf),
        Cell::F64(f) => prost::encoding::double::encode(tag, f, buf),
        Cell::String(s) => prost::encoding::string::encode(tag, s, buf),
    }
}

pub fn cell_encoded_len_prost(cell: &Cell, tag: u32) -> usize {
    match cell {
        Cell::Null => 0,
        Cell::I64(i) => prost::encoding::int64::encoded_len(tag, i),
        Cell::F64(f) => prost::encoding::double::encoded_len(tag, f),
        Cell::String(s) => prost::encoding::string::encoded_len(tag, s),
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn null_cells_are_omitted() {
        let row = BigQueryTableRow(TableRow::new(vec![Cell::I64(5), Cell::Null, Cell::F64(1.5)]));
        let encoded = row.encode_to_vec();

        // field 1 varint 5, field 3 fixed64 1.5
        let mut expected = vec![0x08, 0x05, 0x19];
        expected.extend_from_slice(&1.5f64.to_le_bytes());
        assert_eq!(encoded, expected);
        assert_eq!(row.encoded_len(), encoded.len());
    }

    #[test]
    fn strings_are_length_delimited() {
        let row = BigQueryTableRow(TableRow::new(vec![
            Cell::Null,
            Cell::String("Kopi".to_string()),
        ]));

        assert_eq!(row.encode_to_vec(), vec![0x12, 0x04, b'K', b'o', b'p', b'i']);
    }
}
