use std::io::{self, Read};
use thiserror::Error;

/// How an upload is read. Defaults: one header line, trimmed fields, comma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    /// Lines at the top of the input that are discarded unread, counted by
    /// `\n` so blank lines and `\r\n` endings count like any other line.
    pub skip_lines: u64,
    pub trim: bool,
    pub delimiter: u8,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            skip_lines: 1,
            trim: true,
            delimiter: b',',
        }
    }
}

/// One structurally valid input row. Not yet validated against the domain:
/// `kind` is passed through as text and `category_name` may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    /// 1-based position of the row among the rows that follow the skipped
    /// lines. Blank lines are not counted.
    pub row: u64,
    pub title: String,
    pub kind: String,
    pub value: i64,
    pub category_name: String,
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("CSV read error: {0}")]
    Read(#[from] csv::Error),
}

/// Expected layout: `title, type, value, category`.
const FIELD_COUNT: usize = 4;

/// Discards everything up to and including the `remaining`-th `\n`, then
/// passes the rest through. `\r\n` endings need no special casing.
struct SkipLines<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for SkipLines<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 || self.remaining == 0 {
                return Ok(n);
            }
            let mut start = n;
            for (i, byte) in buf[..n].iter().enumerate() {
                if *byte == b'\n' {
                    self.remaining -= 1;
                    if self.remaining == 0 {
                        start = i + 1;
                        break;
                    }
                }
            }
            if start < n {
                buf.copy_within(start..n, 0);
                return Ok(n - start);
            }
        }
    }
}

/// Lazy, single-pass sequence of candidate rows. Malformed rows are skipped;
/// only a failure of the underlying reader is yielded as an error.
pub struct CandidateRecords<R> {
    records: csv::StringRecordsIntoIter<SkipLines<R>>,
    rows_read: u64,
}

impl<R: Read> CandidateRecords<R> {
    pub fn new(data: R, options: &ParserOptions) -> Self {
        let trim = if options.trim {
            csv::Trim::All
        } else {
            csv::Trim::None
        };
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(trim)
            .delimiter(options.delimiter)
            .from_reader(SkipLines {
                inner: data,
                remaining: options.skip_lines,
            });

        Self {
            records: reader.into_records(),
            rows_read: 0,
        }
    }
}

impl<R: Read> Iterator for CandidateRecords<R> {
    type Item = Result<CandidateRecord, CsvError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = match self.records.next()? {
                Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => {
                    return Some(Err(CsvError::Read(err)));
                }
                next => next,
            };
            self.rows_read += 1;
            let row = self.rows_read;

            let record = match next {
                Ok(record) => record,
                Err(err) => {
                    tracing::debug!(row, "Skipping unreadable row: {err}");
                    continue;
                }
            };

            match candidate_from_fields(row, &record) {
                Some(candidate) => return Some(Ok(candidate)),
                None => tracing::debug!(row, "Skipping malformed row"),
            }
        }
    }
}

fn candidate_from_fields(row: u64, record: &csv::StringRecord) -> Option<CandidateRecord> {
    if record.len() != FIELD_COUNT {
        return None;
    }
    let (title, kind, value, category) = (&record[0], &record[1], &record[2], &record[3]);

    if title.is_empty() || kind.is_empty() || value.is_empty() {
        return None;
    }
    let value = value.parse::<i64>().ok()?;

    Some(CandidateRecord {
        row,
        title: title.to_string(),
        kind: kind.to_string(),
        value,
        category_name: category.to_string(),
    })
}

pub fn parse<R: Read>(data: R, options: &ParserOptions) -> CandidateRecords<R> {
    CandidateRecords::new(data, options)
}

/// Drain the parser, returning every candidate row in input order.
pub fn parse_all<R: Read>(
    data: R,
    options: &ParserOptions,
) -> Result<Vec<CandidateRecord>, CsvError> {
    parse(data, options).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &str) -> Vec<CandidateRecord> {
        parse_all(data.as_bytes(), &ParserOptions::default()).unwrap()
    }

    #[test]
    fn header_is_always_discarded() {
        let data = "Salary,income,5000,Work\nCoffee,outcome,10,Food\n";
        let parsed = rows(data);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "Coffee");
        assert_eq!(parsed[0].row, 1);
    }

    #[test]
    fn fields_are_trimmed() {
        let data = "title, type, value, category\n  Salary ,  income , 5000 ,  Work  \n";
        let parsed = rows(data);
        assert_eq!(
            parsed,
            vec![CandidateRecord {
                row: 1,
                title: "Salary".to_string(),
                kind: "income".to_string(),
                value: 5000,
                category_name: "Work".to_string(),
            }]
        );
    }

    #[test]
    fn untrimmed_mode_keeps_whitespace_and_rejects_padded_value() {
        let options = ParserOptions {
            trim: false,
            ..ParserOptions::default()
        };
        let data = "h\n Salary,income,5000,Work\nCoffee,outcome, 10,Food\n";
        let parsed = parse_all(data.as_bytes(), &options).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, " Salary");
    }

    #[test]
    fn missing_required_fields_are_skipped() {
        let data = "title,type,value,category\n\
                    ,outcome,10,Food\n\
                    Coffee,,10,Food\n\
                    Coffee,outcome,,Food\n\
                    Tea,outcome,3,Food\n";
        let parsed = rows(data);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "Tea");
    }

    #[test]
    fn empty_category_is_kept() {
        let data = "title,type,value,category\nGift,income,200,\n";
        let parsed = rows(data);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].category_name, "");
    }

    #[test]
    fn wrong_field_count_is_skipped() {
        let data = "title,type,value,category\n\
                    Salary,income,5000\n\
                    Salary,income,5000,Work,extra\n\
                    Rent,outcome,900,Home\n";
        let parsed = rows(data);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "Rent");
    }

    #[test]
    fn unparseable_value_is_skipped() {
        let data = "title,type,value,category\n\
                    Salary,income,lots,Work\n\
                    Coffee,outcome,10.50,Food\n\
                    Refund,income,-15,Food\n";
        let parsed = rows(data);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].value, -15);
    }

    #[test]
    fn kind_is_passed_through_unvalidated() {
        let data = "title,type,value,category\nMove,transfer,10,Misc\n";
        assert_eq!(rows(data)[0].kind, "transfer");
    }

    #[test]
    fn custom_delimiter_and_skip_lines() {
        let options = ParserOptions {
            skip_lines: 2,
            delimiter: b';',
            ..ParserOptions::default()
        };
        let data = "exported by bank\ntitle;type;value;category\nSalary;income;5000;Work\n";
        let parsed = parse_all(data.as_bytes(), &options).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].category_name, "Work");
    }

    #[test]
    fn crlf_endings_keep_the_first_data_row() {
        let data = "title,type,value,category\r\nSalary,income,5000,Work\r\nCoffee,outcome,10,Food\r\n";
        let parsed = rows(data);
        let titles: Vec<_> = parsed.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Salary", "Coffee"]);
        assert_eq!(parsed[1].row, 2);
    }

    #[test]
    fn crlf_endings_with_two_skipped_lines() {
        let options = ParserOptions {
            skip_lines: 2,
            ..ParserOptions::default()
        };
        let data = "exported by bank\r\ntitle,type,value,category\r\nSalary,income,5000,Work\r\nCoffee,outcome,10,Food\r\n";
        let parsed = parse_all(data.as_bytes(), &options).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].title, "Salary");
    }

    #[test]
    fn blank_first_line_counts_as_the_header() {
        let data = "\nSalary,income,5000,Work\nCoffee,outcome,10,Food\n";
        let titles: Vec<_> = rows(data).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, ["Salary", "Coffee"]);
    }

    #[test]
    fn blank_line_after_header_is_ignored() {
        let data = "title,type,value,category\n\nSalary,income,5000,Work\n\r\nCoffee,outcome,10,Food\n";
        let titles: Vec<_> = rows(data).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, ["Salary", "Coffee"]);
    }

    #[test]
    fn header_skip_spans_read_boundaries() {
        let data = "title,type,value,category\nSalary,income,5000,Work\nCoffee,outcome,10,Food\n";
        let parsed = parse_all(OneByteReader(data.as_bytes()), &ParserOptions::default()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].title, "Salary");
    }

    #[test]
    fn skip_lines_zero_keeps_everything() {
        let options = ParserOptions {
            skip_lines: 0,
            ..ParserOptions::default()
        };
        let data = "Salary,income,5000,Work\n";
        assert_eq!(parse_all(data.as_bytes(), &options).unwrap().len(), 1);
    }

    #[test]
    fn header_only_input_yields_nothing() {
        assert!(rows("title,type,value,category\n").is_empty());
        assert!(rows("").is_empty());
    }

    #[test]
    fn invalid_utf8_row_is_skipped() {
        let mut data = b"title,type,value,category\n".to_vec();
        data.extend_from_slice(b"Caf\xff,outcome,4,Food\n");
        data.extend_from_slice(b"Tea,outcome,3,Food\n");
        let parsed = parse_all(data.as_slice(), &ParserOptions::default()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "Tea");
    }

    #[test]
    fn parser_is_lazy() {
        let data = "title,type,value,category\nA,income,1,X\nB,income,2,Y\n";
        let mut records = parse(data.as_bytes(), &ParserOptions::default());
        assert_eq!(records.next().unwrap().unwrap().title, "A");
        assert_eq!(records.next().unwrap().unwrap().title, "B");
        assert!(records.next().is_none());
    }

    struct OneByteReader<'a>(&'a [u8]);

    impl Read for OneByteReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match (self.0.split_first(), buf.first_mut()) {
                (Some((byte, rest)), Some(slot)) => {
                    *slot = *byte;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }
    }

    #[test]
    fn reader_failure_is_an_error() {
        let result = parse_all(FailingReader, &ParserOptions::default());
        assert!(matches!(result, Err(CsvError::Read(_))));
    }
}
