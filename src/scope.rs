use heapless::Vec;

use crate::config::MAX_TAG_LEN;
use crate::error::Error;

pub(crate) const OK: &[u8] = b"OK\r\n";
pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const ELEM_STOP: &[u8] = b")";

/// Parsing context of the response currently being read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Scope {
    /// Between commands.
    #[default]
    None,
    /// The whole response, terminated by `OK\r\n`.
    Resp,
    /// One `+PREFIX:` information line, terminated by `\r\n`.
    Info,
    /// A bracketed element inside an information line, terminated by `)`.
    Elem,
}

/// Something the matcher or a caller observed on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScopeEvent {
    /// A response is being started.
    Begin,
    /// An information line was matched: the expected prefix, a URC prefix
    /// or the code of an error response.
    Information,
    /// An element start character was matched.
    Element,
    /// The element stop tag was consumed.
    ElementEnd,
    /// The information stop tag was consumed, or no further information
    /// line follows.
    InformationEnd,
    /// The final result code was matched.
    Final,
    /// The response stop tag was consumed.
    End,
}

impl Scope {
    /// Scope reached from `self` on `event`. Events that do not apply to
    /// the current scope leave it unchanged.
    pub fn next(self, event: ScopeEvent) -> Scope {
        match (self, event) {
            (_, ScopeEvent::Begin | ScopeEvent::Final) => Scope::Resp,
            (_, ScopeEvent::End) => Scope::None,
            (_, ScopeEvent::Information) => Scope::Info,
            (_, ScopeEvent::Element) => Scope::Elem,
            (Scope::Elem, ScopeEvent::ElementEnd) => Scope::Info,
            (Scope::Info | Scope::Elem, ScopeEvent::InformationEnd) => Scope::Resp,
            (scope, _) => scope,
        }
    }
}

/// Byte sequence terminating a scope. An empty sequence never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopTag {
    seq: Vec<u8, MAX_TAG_LEN>,
    pub found: bool,
}

impl StopTag {
    fn with_default(seq: &[u8]) -> Self {
        Self {
            seq: Vec::from_slice(seq).unwrap_or_default(),
            found: false,
        }
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    /// Replace the sequence. `None` disables matching for this scope.
    pub fn set(&mut self, seq: Option<&[u8]>) -> Result<(), Error> {
        self.seq = Vec::from_slice(seq.unwrap_or_default()).map_err(|_| Error::InvalidParameter)?;
        self.found = false;
        Ok(())
    }
}

/// The three stop tags, one per scope.
#[derive(Debug, Clone)]
pub(crate) struct Tags {
    resp: StopTag,
    info: StopTag,
    elem: StopTag,
}

impl Default for Tags {
    fn default() -> Self {
        Self {
            resp: StopTag::with_default(OK),
            info: StopTag::with_default(CRLF),
            elem: StopTag::with_default(ELEM_STOP),
        }
    }
}

impl Tags {
    pub fn get(&self, scope: Scope) -> Option<&StopTag> {
        match scope {
            Scope::None => None,
            Scope::Resp => Some(&self.resp),
            Scope::Info => Some(&self.info),
            Scope::Elem => Some(&self.elem),
        }
    }

    pub fn get_mut(&mut self, scope: Scope) -> Option<&mut StopTag> {
        match scope {
            Scope::None => None,
            Scope::Resp => Some(&mut self.resp),
            Scope::Info => Some(&mut self.info),
            Scope::Elem => Some(&mut self.elem),
        }
    }

    pub fn resp(&self) -> &StopTag {
        &self.resp
    }

    pub fn resp_mut(&mut self) -> &mut StopTag {
        &mut self.resp
    }
}
