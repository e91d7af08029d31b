
//! Core library for the Cells messaging runtime.
//! Provides named message handlers (cells) hosted in routing containers
//! (domains), envelope delivery along explicit hop paths, request/reply
//! correlation with deadlines, and diagnostic context propagation.
//! It is designed to be modular and extensible, allowing developers to plug
//! custom cells and cross-domain transports into the runtime.

pub use cells::{
    BoxPayload, Cdc, CdcSnapshot, Cell, CellAddress, CellConfig, CellContext,
    CellDomain, CellEndpoint, CellPath, CellState, DomainEvent, DomainRef,
    DomainRunner, DrainPolicy, Envelope, Error as CellError, LOCAL_DOMAIN,
    LoopbackTransport, MailboxPolicy, PathHop, Payload, PendingHandle,
    ReplyCallback, ReplyResult, SessionGenerator, Transport, downcast,
};
