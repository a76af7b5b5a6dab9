/// Normalizes guest output for a raw host terminal.
///
/// A bare `\n` becomes `\r\n`. A `\n` already preceded by `\r` passes
/// through, including when the pair is split across two reads. A lone `\r`
/// is left alone.
#[derive(Debug, Default, Clone)]
pub struct NewlineTranslator {
    prev_cr: bool,
}

impl NewlineTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the translated form of `input` to `out`.
    pub fn translate(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len());
        for &byte in input {
            if byte == b'\n' && !self.prev_cr {
                out.push(b'\r');
            }
            out.push(byte);
            self.prev_cr = byte == b'\r';
        }
    }
}
