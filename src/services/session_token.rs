use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use base64::Engine;
use rand::RngCore;

/// Raw entropy per token. Six bytes encode to exactly eight URL-safe characters.
pub const SESSION_TOKEN_BYTES: usize = 6;

/// Generate a fresh session token from `rng`, normally the operating
/// system's CSPRNG.
///
/// No uniqueness check is made against live sessions; 48 bits keeps collisions
/// negligible. A failing entropy source is returned as an error instead of
/// falling back to anything predictable.
pub fn new_session_token<R: RngCore + ?Sized>(rng: &mut R) -> Result<String, rand::Error> {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    rng.try_fill_bytes(&mut bytes)?;
    Ok(BASE64.encode(bytes))
}

/// An entropy source that always fails, for exercising the error path.
#[cfg(test)]
pub(crate) struct ExhaustedRng;

#[cfg(test)]
impl RngCore for ExhaustedRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
        Err(rand::Error::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "entropy unavailable",
        )))
    }
}
