//! Runs an invocation script against an in-memory store, the way a host
//! would feed invocations to the dispatcher one at a time.

use std::io::{Read, Write};

use crate::{
    config::LedgerConfig, dispatcher::Dispatcher, store::in_memory_store::InMemoryDocumentStore,
};
use anyhow::Result;
use tracing::debug;
use csv_parser::CsvInvocationParser;
use csv_printer::{ResponseRow, print_responses};
pub mod csv_parser;
pub mod csv_printer;

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub config: LedgerConfig,
    pub error_printer: Box<dyn FnMut(u64, csv::Error)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvInvocationParser::new(self.input);
        let mut dispatcher = Dispatcher::new(InMemoryDocumentStore::default(), self.config);
        let error_printer = &mut self.error_printer;

        let rows = parser.filter_map(|(line, row)| match row {
            Ok(invocation) => {
                let response = dispatcher.invoke(&invocation.operation, &invocation.args);
                Some(ResponseRow::new(line, invocation.operation, response))
            }
            Err(err) => {
                error_printer(line, err);
                None
            }
        });
        print_responses(self.output, rows)?;
        debug!(documents = dispatcher.store().len(), "script finished");
        Ok(())
    }
}
