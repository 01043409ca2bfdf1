#![no_main]

use std::cell::RefCell;
use std::rc::Rc;

use libfuzzer_sys::fuzz_target;

use rapid_csv::{Parser, ParserBuilder};

type Rows = Rc<RefCell<Vec<Vec<Vec<u8>>>>>;

fn collecting_parser() -> (Parser, Rows) {
    let mut builder = ParserBuilder::new();
    builder.ignore_empty_lines(false);

    let mut parser = builder.build().unwrap();

    let rows: Rows = Rc::default();
    let sink = rows.clone();

    parser.set_row_callback(move |row| {
        sink.borrow_mut()
            .push(row.iter().map(|field| field.as_bytes().to_vec()).collect());
    });

    (parser, rows)
}

// Replaying the input in chunks of any size must produce the same rows as
// parsing it whole.
fuzz_target!(|data: &[u8]| {
    let Some((&size_byte, input)) = data.split_first() else {
        return;
    };

    let chunk_size = (size_byte as usize % 16) + 1;

    let (mut whole_parser, whole_rows) = collecting_parser();
    whole_parser.parse_buffer(input, true).unwrap();

    let (mut chunked_parser, chunked_rows) = collecting_parser();
    for chunk in input.chunks(chunk_size) {
        chunked_parser.parse_buffer(chunk, false).unwrap();
    }
    chunked_parser.parse_buffer(&[], true).unwrap();

    assert_eq!(*whole_rows.borrow(), *chunked_rows.borrow());
});
