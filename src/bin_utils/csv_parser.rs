use std::io::{self, BufRead, BufReader, Read};

use csv::{ReaderBuilder, StringRecord, Trim};

/// One scripted call: operation name followed by its string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub operation: String,
    pub args: Vec<String>,
}

/// Parses an invocation script in CSV format, one invocation per line.
///
/// Rows have no header and may have any number of columns. Blank lines
/// and lines starting with `#` are skipped but still counted, so every
/// item carries the line it was read from.
pub struct CsvInvocationParser<R> {
    source: BufReader<R>,
    line: u64,
    done: bool,
}

impl<R> CsvInvocationParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        Self {
            source: BufReader::new(source),
            line: 0,
            done: false,
        }
    }

    /// `Ok(None)` for blank and comment lines.
    fn parse_line(text: &str) -> Result<Option<Invocation>, csv::Error> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() || text.starts_with('#') {
            return Ok(None);
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .trim(Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());
        let mut record = StringRecord::new();
        if !reader.read_record(&mut record)? {
            return Ok(None);
        }
        let mut fields = record.iter().map(ToOwned::to_owned);
        Ok(Some(Invocation {
            operation: fields.next().unwrap_or_default(),
            args: fields.collect(),
        }))
    }
}

impl<R> Iterator for CsvInvocationParser<R>
where
    R: Read,
{
    type Item = (u64, Result<Invocation, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut bytes = Vec::new();
            match self.source.read_until(b'\n', &mut bytes) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    let row = match String::from_utf8(bytes) {
                        Ok(text) => Self::parse_line(&text).transpose(),
                        Err(err) => Some(Err(io::Error::new(io::ErrorKind::InvalidData, err).into())),
                    };
                    if let Some(row) = row {
                        return Some((self.line, row));
                    }
                }
                Err(err) => {
                    self.done = true;
                    return Some((self.line + 1, Err(err.into())));
                }
            }
        }
        None
    }
}
