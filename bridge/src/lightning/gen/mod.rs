// Protocol stubs for the Lightning node, generated with tonic-build
// from the trimmed definitions under proto/. Regenerate instead of
// editing by hand.

pub mod lnrpc;
pub mod routerrpc;
