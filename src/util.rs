use crate::error::{Error, ErrorKind};
use crate::Peripheral;

pub(crate) trait OptionExt<T> {
    /// Fails with [ErrorKind::PeripheralDisconnected] if the peripheral has been
    /// disconnected meanwhile, otherwise with the error built by `err`.
    fn ok_or_check_conn(self, peripheral: &Peripheral, err: impl FnOnce() -> Error)
        -> Result<T, Error>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_check_conn(
        self,
        peripheral: &Peripheral,
        err: impl FnOnce() -> Error,
    ) -> Result<T, Error> {
        self.ok_or_else(|| {
            if peripheral.is_disconnected() {
                ErrorKind::PeripheralDisconnected.into()
            } else {
                err()
            }
        })
    }
}
