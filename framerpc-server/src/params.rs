//! Binding raw `params` to a handler's argument tuple
//!
//! A handler's argument list is described once, at registration, by a
//! [`ParamSignature`]: one [`ParamModifier`] per argument position, plus the
//! names of the ordinary (deserialized) arguments when the method accepts
//! named params. At call time [`ArgSource`] splits the raw params into
//! borrowed `&RawValue` members and hands each ordinary argument its own;
//! ambient arguments ([`RequestId`], [`Cancellation`]) are filled from the
//! [`CallScope`] instead.

use crate::entry::CallScope;
use framerpc_core::{Error, Id, Result};
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// How one argument position is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamModifier {
    /// Deserialized from `params`
    Ordinary,
    /// Injected: the id of the request (`None` for notifications)
    RequestId,
    /// Injected: a token cancelled when the caller cancels the request
    Cancellation,
}

/// Ambient argument carrying the request id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub Option<Id>);

/// Ambient argument carrying the request's cancellation token
#[derive(Debug, Clone, Default)]
pub struct Cancellation(pub CancellationToken);

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the request is cancelled
    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.0
    }
}

/// One handler argument
///
/// Every deserializable type is an ordinary argument. [`RequestId`] and
/// [`Cancellation`] are ambient and never read from `params`.
pub trait Arg: Sized + Send + 'static {
    const MODIFIER: ParamModifier;

    fn extract(source: &mut ArgSource<'_>, scope: &CallScope) -> Result<Self>;
}

impl<T> Arg for T
where
    T: DeserializeOwned + Send + 'static,
{
    const MODIFIER: ParamModifier = ParamModifier::Ordinary;

    fn extract(source: &mut ArgSource<'_>, _scope: &CallScope) -> Result<Self> {
        source.next_ordinary()
    }
}

impl Arg for RequestId {
    const MODIFIER: ParamModifier = ParamModifier::RequestId;

    fn extract(_source: &mut ArgSource<'_>, scope: &CallScope) -> Result<Self> {
        Ok(RequestId(scope.id.clone()))
    }
}

impl Arg for Cancellation {
    const MODIFIER: ParamModifier = ParamModifier::Cancellation;

    fn extract(_source: &mut ArgSource<'_>, scope: &CallScope) -> Result<Self> {
        Ok(Cancellation(scope.cancellation.clone().unwrap_or_default()))
    }
}

/// A handler's full argument tuple
pub trait ArgList: Sized + Send + 'static {
    fn modifiers() -> Vec<ParamModifier>;

    fn extract(source: &mut ArgSource<'_>, scope: &CallScope) -> Result<Self>;
}

macro_rules! impl_arg_list {
    ($($A:ident),*) => {
        impl<$($A: Arg),*> ArgList for ($($A,)*) {
            fn modifiers() -> Vec<ParamModifier> {
                vec![$($A::MODIFIER),*]
            }

            #[allow(unused_variables)]
            fn extract(source: &mut ArgSource<'_>, scope: &CallScope) -> Result<Self> {
                Ok(($($A::extract(source, scope)?,)*))
            }
        }
    };
}

impl_arg_list!();
impl_arg_list!(A1);
impl_arg_list!(A1, A2);
impl_arg_list!(A1, A2, A3);
impl_arg_list!(A1, A2, A3, A4);
impl_arg_list!(A1, A2, A3, A4, A5);
impl_arg_list!(A1, A2, A3, A4, A5, A6);
impl_arg_list!(A1, A2, A3, A4, A5, A6, A7);
impl_arg_list!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Registration-time description of a handler's parameters
#[derive(Debug, Clone)]
pub struct ParamSignature {
    modifiers: Vec<ParamModifier>,
    names: Vec<String>,
    whole: bool,
}

impl ParamSignature {
    /// Positional-only signature
    pub fn new(modifiers: Vec<ParamModifier>) -> Self {
        Self {
            modifiers,
            names: Vec::new(),
            whole: false,
        }
    }

    /// Accept named params; one name per ordinary argument, in order
    pub fn with_names<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        let ordinary = self.ordinary_count();
        if names.len() != ordinary {
            return Err(Error::Signature(format!(
                "{} parameter names given for {} deserialized parameters",
                names.len(),
                ordinary
            )));
        }
        self.names = names.iter().map(|n| n.as_ref().to_owned()).collect();
        Ok(self)
    }

    /// Deserialize the whole `params` value into the single ordinary argument
    pub fn whole_params(mut self) -> Result<Self> {
        if self.ordinary_count() != 1 {
            return Err(Error::Signature(format!(
                "whole-params binding needs exactly one deserialized parameter, found {}",
                self.ordinary_count()
            )));
        }
        self.whole = true;
        Ok(self)
    }

    pub fn modifiers(&self) -> &[ParamModifier] {
        &self.modifiers
    }

    pub fn ordinary_count(&self) -> usize {
        self.modifiers
            .iter()
            .filter(|m| **m == ParamModifier::Ordinary)
            .count()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn binds_whole(&self) -> bool {
        self.whole
    }

    pub fn accepts_cancellation(&self) -> bool {
        self.modifiers.contains(&ParamModifier::Cancellation)
    }

    fn label(&self, index: usize) -> String {
        match self.names.get(index) {
            Some(name) => format!("'{}'", name),
            None => format!("#{}", index),
        }
    }
}

/// An object member name; borrowed unless it carried escapes
#[derive(PartialEq, Eq, Hash)]
struct MemberName<'a>(Cow<'a, str>);

impl std::borrow::Borrow<str> for MemberName<'_> {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for MemberName<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NameVisitor;

        impl<'de> Visitor<'de> for NameVisitor {
            type Value = MemberName<'de>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a member name")
            }

            fn visit_borrowed_str<E: de::Error>(self, v: &'de str) -> std::result::Result<Self::Value, E> {
                Ok(MemberName(Cow::Borrowed(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(MemberName(Cow::Owned(v.to_owned())))
            }
        }

        deserializer.deserialize_str(NameVisitor)
    }
}

enum Shape<'a> {
    Absent,
    Whole(&'a [u8]),
    Positional(std::vec::IntoIter<&'a RawValue>),
    Named(HashMap<MemberName<'a>, &'a RawValue>),
}

/// Call-time cursor handing out one raw value per ordinary argument
pub struct ArgSource<'a> {
    shape: Shape<'a>,
    signature: &'a ParamSignature,
    next: usize,
}

impl<'a> ArgSource<'a> {
    pub fn new(params: Option<&'a [u8]>, signature: &'a ParamSignature) -> Result<Self> {
        let shape = match params {
            _ if signature.whole => Shape::Whole(params.unwrap_or(b"null")),
            None => Shape::Absent,
            Some(bytes) => match bytes.first() {
                Some(b'[') => Shape::Positional(split::<Vec<_>>(bytes)?.into_iter()),
                Some(b'{') if signature.names.is_empty() && signature.ordinary_count() > 0 => {
                    return Err(Error::InvalidParams(
                        "method does not accept named parameters".to_string(),
                    ))
                }
                Some(b'{') => Shape::Named(split(bytes)?),
                _ => {
                    return Err(Error::InvalidParams(
                        "params must be an array or an object".to_string(),
                    ))
                }
            },
        };
        Ok(Self {
            shape,
            signature,
            next: 0,
        })
    }

    /// Deserialize the next ordinary argument; a missing value reads as `null`
    pub fn next_ordinary<T: DeserializeOwned>(&mut self) -> Result<T> {
        let index = self.next;
        self.next += 1;

        let raw: &[u8] = match &mut self.shape {
            Shape::Absent => b"null",
            Shape::Whole(bytes) => *bytes,
            Shape::Positional(elements) => elements
                .next()
                .map_or(&b"null"[..], |element| element.get().as_bytes()),
            Shape::Named(members) => {
                let name = self.signature.names.get(index).ok_or_else(|| {
                    Error::Internal(format!("no name declared for parameter #{}", index))
                })?;
                members
                    .get(name.as_str())
                    .map_or(&b"null"[..], |member| member.get().as_bytes())
            }
        };

        serde_json::from_slice(raw).map_err(|e| {
            Error::InvalidParams(format!("parameter {}: {}", self.signature.label(index), e))
        })
    }

    /// Reject positional params left over after every argument was bound
    pub fn finish(self) -> Result<()> {
        if let Shape::Positional(elements) = &self.shape {
            if elements.len() > 0 {
                return Err(Error::InvalidParams(format!(
                    "too many positional parameters, expected {}",
                    self.signature.ordinary_count()
                )));
            }
        }
        Ok(())
    }
}

/// Bind `params` to the argument tuple `A`
pub fn bind<A: ArgList>(
    signature: &ParamSignature,
    params: Option<&[u8]>,
    scope: &CallScope,
) -> Result<A> {
    let mut source = ArgSource::new(params, signature)?;
    let args = A::extract(&mut source, scope)?;
    source.finish()?;
    Ok(args)
}

/// Split a params array or object into borrowed members
fn split<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::InvalidParams(format!("malformed params: {}", e)))
}
