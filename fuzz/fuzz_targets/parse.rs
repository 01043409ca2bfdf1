#![no_main]

use libfuzzer_sys::fuzz_target;

use rapid_csv::ParserBuilder;

fuzz_target!(|data: &[u8]| {
    for strict in [false, true] {
        let mut builder = ParserBuilder::new();
        builder.strict_mode(strict).ignore_empty_lines(false);

        let mut parser = builder.build().unwrap();

        parser.set_row_callback(|row| {
            // Field count and resolution must always agree.
            assert_eq!(row.iter().count(), row.len());
        });

        // Errors are fine, panics are not.
        let _ = parser.parse_buffer(data, true);
    }
});
