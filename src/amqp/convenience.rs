use lapin::{types::AMQPValue, BasicProperties};
use std::borrow::{Borrow, Cow};

/// Convenience methods for [`lapin::BasicProperties`].
pub trait BasicPropertiesExt {
    /// Lookup header by key.
    fn get_header<Q>(&self, key: &Q) -> Option<&AMQPValue>
    where
        lapin::types::ShortString: Borrow<Q> + Ord,
        Q: Ord + ?Sized;

    /// Lookup a header string value.
    ///
    /// Returns `None` if not a string.
    fn get_header_str<Q>(&self, key: &Q) -> Option<Cow<'_, str>>
    where
        lapin::types::ShortString: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.get_header(key).and_then(amqp_value_as_str)
    }
}

/// Read an AMQP value as a string.
///
/// Returns `None` if not a string.
pub fn amqp_value_as_str(value: &AMQPValue) -> Option<Cow<'_, str>> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes())),
        AMQPValue::ShortString(s) => Some(Cow::Borrowed(s.as_str())),
        _ => None,
    }
}

impl BasicPropertiesExt for lapin::BasicProperties {
    fn get_header<Q>(&self, key: &Q) -> Option<&AMQPValue>
    where
        lapin::types::ShortString: Borrow<Q> + Ord,
        Q: Ord + ?Sized,
    {
        self.headers().as_ref()?.inner().get(key)
    }
}

/// Set the value for a header inside a collection of AMQP properties.
///
/// # Implementation notes
///
/// The current version is wasteful - we are cloning all the headers, but `lapin` does not allow us
/// to do any better. We consume the `properties` input to make sure the caller does not re-use
/// it under the impression that it has been mutated to add the new header.
///
/// We should submit a PR upstream to get mutable access to headers from BasicProperties.
///
/// # Example
///
/// ```rust
/// use warren::amqp::types::{AMQPValue, ShortString};
/// use warren::amqp::{BasicProperties, convenience::set_header};
///
/// // Empty set of headers
/// let properties = BasicProperties::default();
///
/// let header_name = "MyHeaderName";
/// // AMQP has various string types - see https://www.rabbitmq.com/amqp-0-9-1-reference.html#domains
/// let header_value = AMQPValue::LongString(header_name.into());
///
/// // `set_header` consumes `properties` and returns the updated collection
/// let properties = set_header(properties, header_name, header_value.clone());
///
/// // Assert
/// let headers = properties.headers().as_ref().unwrap().inner();
/// let header_name: ShortString = header_name.into();
/// assert_eq!(&header_value, headers.get(&header_name).unwrap());
/// ```
pub fn set_header(
    properties: BasicProperties,
    header_name: &str,
    header_value: AMQPValue,
) -> BasicProperties {
    let mut headers = properties
        .headers()
        .as_ref()
        .map(|h| h.to_owned())
        .unwrap_or_default();
    headers.insert(header_name.into(), header_value);
    properties.with_headers(headers)
}
