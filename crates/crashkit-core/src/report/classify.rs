//! Panic payload classification.

use std::alloc::LayoutError;
use std::any::Any;
use std::borrow::Cow;
use std::collections::TryReserveError;
use std::num::{ParseFloatError, ParseIntError, TryFromIntError};
use std::str::Utf8Error;
use std::string::FromUtf8Error;

use crate::types::ExceptionKind;

const ALLOCATION_MARKERS: &[&str] = &["capacity overflow", "memory allocation of", "TryReserveError", "LayoutError"];
const INVALID_ARGUMENT_MARKERS: &[&str] = &[
    "ParseIntError",
    "ParseFloatError",
    "TryFromIntError",
    "Utf8Error",
    "invalid digit found in string",
    "invalid float literal",
];
const OUT_OF_RANGE_MARKERS: &[&str] = &[
    "index out of bounds",
    "out of range",
    "range end index",
    "range start index",
    "slice index starts at",
];

/// Derive the exception kind and message from a panic payload.
///
/// Typed payloads raised with `std::panic::panic_any` are recognized by
/// downcasting. String payloads (everything `panic!`, `unwrap` and
/// `expect` produce) are classified by their text. Any other payload is
/// [`ExceptionKind::Unknown`] with no message.
pub fn classify_panic(payload: &(dyn Any + Send)) -> (ExceptionKind, Option<Cow<'_, str>>)
{
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return (classify_message(message), Some(Cow::Borrowed(*message)));
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return (classify_message(message), Some(Cow::Borrowed(message.as_str())));
    }

    if let Some(err) = payload.downcast_ref::<TryReserveError>() {
        return (ExceptionKind::AllocationFailure, Some(Cow::Owned(err.to_string())));
    }
    if let Some(err) = payload.downcast_ref::<LayoutError>() {
        return (ExceptionKind::AllocationFailure, Some(Cow::Owned(err.to_string())));
    }

    let invalid = payload
        .downcast_ref::<ParseIntError>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<ParseFloatError>().map(ToString::to_string))
        .or_else(|| payload.downcast_ref::<TryFromIntError>().map(ToString::to_string))
        .or_else(|| payload.downcast_ref::<Utf8Error>().map(ToString::to_string))
        .or_else(|| payload.downcast_ref::<FromUtf8Error>().map(ToString::to_string));
    if let Some(message) = invalid {
        return (ExceptionKind::InvalidArgument, Some(Cow::Owned(message)));
    }

    (ExceptionKind::Unknown, None)
}

/// Classify a panic message by the wording std and common error types use.
pub fn classify_message(message: &str) -> ExceptionKind
{
    let contains_any = |markers: &[&str]| markers.iter().any(|marker| message.contains(marker));
    if contains_any(ALLOCATION_MARKERS) {
        ExceptionKind::AllocationFailure
    } else if contains_any(INVALID_ARGUMENT_MARKERS) {
        ExceptionKind::InvalidArgument
    } else if contains_any(OUT_OF_RANGE_MARKERS) {
        ExceptionKind::OutOfRange
    } else {
        ExceptionKind::RuntimeFailure
    }
}
