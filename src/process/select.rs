use super::RawTable;

/// Index of the frequency table: the first table at or after `nominal` with
/// at least one content row below its `header_rows` header rows.
pub fn select_frequency_table(tables: &[RawTable], nominal: usize, header_rows: usize) -> Option<usize> {
    tables
        .iter()
        .enumerate()
        .skip(nominal)
        .find(|(_, t)| t.content_rows(header_rows).next().is_some())
        .map(|(i, _)| i)
}
