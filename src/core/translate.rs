// Error translation hook applied to every error before it reaches the caller.
use crate::core::error::Error;

/// Lets callers remap errors (typically the not-found sentinel) to their own.
pub trait ErrorTranslator: Send + Sync {
    fn translate(&self, err: Error) -> Error;
}

impl<F> ErrorTranslator for F
where
    F: Fn(Error) -> Error + Send + Sync,
{
    fn translate(&self, err: Error) -> Error {
        self(err)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl ErrorTranslator for PassThrough {
    fn translate(&self, err: Error) -> Error {
        err
    }
}

pub(crate) fn translate_result<T>(
    result: Result<T, Error>,
    translator: &dyn ErrorTranslator,
) -> Result<T, Error> {
    result.map_err(|err| translator.translate(err))
}
