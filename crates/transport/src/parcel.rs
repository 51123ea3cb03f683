//! Typed request/reply payloads.

use crate::binder::Handle;
use capbridge_core::{Error, Result};

#[derive(Debug, Clone)]
enum Word {
    Token(String),
    Int(i32),
    Handle(Option<Handle>),
    IntArray(Vec<i32>),
    Blob(Vec<u8>),
    NoException,
    Exception(String),
}

impl Word {
    fn kind(&self) -> &'static str {
        match self {
            Word::Token(_) => "interface token",
            Word::Int(_) => "int",
            Word::Handle(_) => "handle",
            Word::IntArray(_) => "int array",
            Word::Blob(_) => "blob",
            Word::NoException | Word::Exception(_) => "exception marker",
        }
    }
}

/// An ordered sequence of words written by one side and read back in the
/// same order by the other. Reads advance an internal cursor that is
/// independent of writes.
#[derive(Debug, Clone, Default)]
pub struct Parcel {
    words: Vec<Word>,
    position: usize,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of words not yet read.
    pub fn remaining(&self) -> usize {
        self.words.len().saturating_sub(self.position)
    }

    /// Move the read cursor back to the first word.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    fn next(&mut self, expected: &'static str) -> Result<Word> {
        let word = self.words.get(self.position).cloned().ok_or_else(|| {
            Error::protocol(format!(
                "expected {expected} at position {}, parcel has {} words",
                self.position,
                self.words.len()
            ))
        })?;
        self.position += 1;
        Ok(word)
    }

    fn mismatch(&self, expected: &'static str, found: &Word) -> Error {
        Error::protocol(format!(
            "expected {expected} at position {}, found {}",
            self.position - 1,
            found.kind()
        ))
    }

    pub fn write_interface_token(&mut self, descriptor: &str) {
        self.words.push(Word::Token(descriptor.to_string()));
    }

    /// Read the interface token and fail unless it equals `descriptor`.
    pub fn enforce_interface(&mut self, descriptor: &str) -> Result<()> {
        match self.next("interface token")? {
            Word::Token(token) if token == descriptor => Ok(()),
            Word::Token(token) => Err(Error::protocol(format!(
                "interface token mismatch: expected '{descriptor}', got '{token}'"
            ))),
            other => Err(self.mismatch("interface token", &other)),
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.words.push(Word::Int(value));
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        match self.next("int")? {
            Word::Int(value) => Ok(value),
            other => Err(self.mismatch("int", &other)),
        }
    }

    /// Unsigned words travel as their two's-complement `i32` bit pattern.
    pub fn write_u32(&mut self, value: u32) {
        self.write_i32(value as i32);
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_i32().map(|value| value as u32)
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_i32(i32::from(value));
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.read_i32().map(|value| value != 0)
    }

    pub fn write_handle(&mut self, handle: Option<&Handle>) {
        self.words.push(Word::Handle(handle.cloned()));
    }

    pub fn read_handle(&mut self) -> Result<Option<Handle>> {
        match self.next("handle")? {
            Word::Handle(handle) => Ok(handle),
            other => Err(self.mismatch("handle", &other)),
        }
    }

    pub fn write_i32_array(&mut self, values: &[i32]) {
        self.words.push(Word::IntArray(values.to_vec()));
    }

    pub fn read_i32_array(&mut self) -> Result<Vec<i32>> {
        match self.next("int array")? {
            Word::IntArray(values) => Ok(values),
            other => Err(self.mismatch("int array", &other)),
        }
    }

    pub fn write_blob(&mut self, bytes: Vec<u8>) {
        self.words.push(Word::Blob(bytes));
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>> {
        match self.next("blob")? {
            Word::Blob(bytes) => Ok(bytes),
            other => Err(self.mismatch("blob", &other)),
        }
    }

    /// Mark a reply as successful. Must precede any return value.
    pub fn write_no_exception(&mut self) {
        self.words.push(Word::NoException);
    }

    /// Mark a reply as failed with a propagated exception.
    pub fn write_exception(&mut self, message: impl Into<String>) {
        self.words.push(Word::Exception(message.into()));
    }

    /// Read the exception marker; a propagated exception becomes an error.
    pub fn read_exception(&mut self) -> Result<()> {
        match self.next("exception marker")? {
            Word::NoException => Ok(()),
            Word::Exception(message) => Err(Error::remote_exception(message)),
            other => Err(self.mismatch("exception marker", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_follow_write_order() {
        let mut parcel = Parcel::new();
        parcel.write_interface_token("svc");
        parcel.write_i32(-7);
        parcel.write_u32(0xFFFF_FFFF);
        parcel.write_bool(true);
        parcel.write_i32_array(&[10_001, 10_002]);
        parcel.write_blob(vec![1, 2, 3]);

        parcel.enforce_interface("svc").unwrap();
        assert_eq!(parcel.read_i32().unwrap(), -7);
        assert_eq!(parcel.read_u32().unwrap(), 0xFFFF_FFFF);
        assert!(parcel.read_bool().unwrap());
        assert_eq!(parcel.read_i32_array().unwrap(), vec![10_001, 10_002]);
        assert_eq!(parcel.read_blob().unwrap(), vec![1, 2, 3]);
        assert_eq!(parcel.remaining(), 0);
    }

    #[test]
    fn test_token_mismatch_is_protocol_error() {
        let mut parcel = Parcel::new();
        parcel.write_interface_token("other");
        let err = parcel.enforce_interface("svc").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(err.to_string().contains("'svc'"));
    }

    #[test]
    fn test_reading_past_end_fails() {
        let mut parcel = Parcel::new();
        assert!(parcel.read_i32().is_err());
        assert!(parcel.read_exception().is_err());
    }

    #[test]
    fn test_type_mismatch_fails() {
        let mut parcel = Parcel::new();
        parcel.write_i32(1);
        let err = parcel.read_handle().unwrap_err();
        assert!(err.to_string().contains("found int"));
    }

    #[test]
    fn test_exception_marker() {
        let mut ok = Parcel::new();
        ok.write_no_exception();
        ok.write_handle(None);
        ok.read_exception().unwrap();
        assert!(ok.read_handle().unwrap().is_none());

        let mut failed = Parcel::new();
        failed.write_exception("SecurityException: denied");
        let err = failed.read_exception().unwrap_err();
        assert!(matches!(err, Error::RemoteException { .. }));
    }

    #[test]
    fn test_rewind() {
        let mut parcel = Parcel::new();
        parcel.write_i32(3);
        assert_eq!(parcel.read_i32().unwrap(), 3);
        parcel.rewind();
        assert_eq!(parcel.read_i32().unwrap(), 3);
    }
}
