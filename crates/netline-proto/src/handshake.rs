//! Wire codes shared by the proxy authentication handshake.
//!
//! The challenge/certificate exchange runs between a session's prototype
//! registry (`ChallengeOut`/`CertificateIn` in `netline-server`) and a
//! client's (`ChallengeIn`/`CertificateOut` in `netline-client`). Neither
//! crate depends on the other, so the codes they must agree on live here
//! instead.

/// Wire code for the server-to-client challenge message.
pub const CHALLENGE_CODE: u32 = 1;

/// Wire code for the client-to-server certificate reply.
pub const CERTIFICATE_CODE: u32 = 2;
