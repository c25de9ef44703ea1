//! Element-at-a-time streaming of a top-level JSON array.
//!
//! A shard holding `[ {...}, {...}, ... ]` may be far larger than memory. Instead of
//! deserializing the whole array, a [`Visitor`] pulls elements from the sequence one at
//! a time and hands each to the caller before asking for the next, so memory is bounded
//! by the largest single element.

use crate::error::StreamError;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde_json::{Map, Value};
use std::fmt;
use std::io::{self, BufReader, Read};

/// Why the visitor stopped early, recorded outside `serde`'s error channel so the
/// caller can tell a broken sink from a broken source.
enum Fault {
    NotAnObject,
    Sink(io::Error),
}

struct ElementVisitor<'a, F> {
    on_record: &'a mut F,
    records: &'a mut u64,
    fault: &'a mut Option<Fault>,
}

impl<'de, F> Visitor<'de> for ElementVisitor<'_, F>
where
    F: FnMut(&Map<String, Value>, Option<&str>) -> io::Result<()>,
{
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a JSON array of objects")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(element) = seq.next_element::<Value>()? {
            let Value::Object(object) = element else {
                *self.fault = Some(Fault::NotAnObject);
                return Err(de::Error::custom("array element is not a JSON object"));
            };
            if let Err(err) = (self.on_record)(&object, None) {
                *self.fault = Some(Fault::Sink(err));
                return Err(de::Error::custom("record sink failed"));
            }
            *self.records += 1;
        }
        Ok(())
    }
}

/// Stream the elements of a top-level JSON array.
///
/// Each element must be an object; it is passed to `on_record` (with no source text)
/// before the next element is parsed. Elements already delivered stay delivered if the
/// array turns out to be truncated or malformed further on.
///
/// # Returns
/// The number of elements delivered.
///
/// # Errors
/// See [`StreamError`]; trailing non-whitespace after the closing `]` is a parse error.
pub fn stream_array<R, F>(reader: R, mut on_record: F) -> Result<u64, StreamError>
where
    R: Read,
    F: FnMut(&Map<String, Value>, Option<&str>) -> io::Result<()>,
{
    let mut records = 0u64;
    let mut fault = None;
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(reader));
    let outcome = (&mut de)
        .deserialize_seq(ElementVisitor {
            on_record: &mut on_record,
            records: &mut records,
            fault: &mut fault,
        })
        .and_then(|()| de.end());

    match (outcome, fault) {
        (_, Some(Fault::Sink(err))) => Err(StreamError::Sink(err)),
        (_, Some(Fault::NotAnObject)) => Err(StreamError::NotAnObject {
            index: records + 1,
            line: None,
        }),
        (Err(err), None) => Err(StreamError::from_json(err, records, None)),
        (Ok(()), None) => Ok(records),
    }
}
