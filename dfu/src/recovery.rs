//! Bringing a device back to `dfuIDLE` before a new transfer

use log::{debug, info, warn};

use crate::{
    DfuConnection, DfuError, MAX_RECOVERY_POLLS,
    status::{DfuState, DfuStatus},
    transport::DfuTransport,
};

/// Action taken after observing a device state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RecoveryStep {
    /// `dfuIDLE`: ready for a new transfer
    Ready,
    /// `dfuERROR` is sticky and has to be cleared
    ClearStatus,
    /// A left-over download / upload is still open
    Abort,
    /// Transitional state, ask again
    Poll,
    /// Device has not entered DFU mode
    RuntimeMode,
}

pub(crate) fn next_step(state: DfuState) -> RecoveryStep {
    match state {
        DfuState::AppIdle | DfuState::AppDetach => RecoveryStep::RuntimeMode,
        DfuState::DfuError => RecoveryStep::ClearStatus,
        DfuState::DfuDownloadIdle | DfuState::DfuUploadIdle => {
            RecoveryStep::Abort
        }
        DfuState::DfuIdle => RecoveryStep::Ready,
        DfuState::DfuDownloadSync
        | DfuState::DfuDownloadBusy
        | DfuState::DfuManifestSync
        | DfuState::DfuManifest
        | DfuState::DfuManifestWaitReset
        | DfuState::Unknown(_) => RecoveryStep::Poll,
    }
}

impl<T: DfuTransport> DfuConnection<T> {
    /// Drive the device to `dfuIDLE` with an OK status.
    ///
    /// Polls at most [MAX_RECOVERY_POLLS] times, honouring the poll timeout
    /// after each `DFU_GETSTATUS`. A non-OK status found in `dfuIDLE` is
    /// cleared once; if it persists the device is given up on.
    pub fn reset_state(&self) -> Result<DfuStatus, DfuError> {
        let mut last_state = DfuState::Unknown(0xff);
        for _ in 0..MAX_RECOVERY_POLLS {
            let st = self.get_status()?;
            st.wait();
            last_state = st.state();

            match next_step(st.state()) {
                RecoveryStep::Ready => return self.clear_pending_status(st),
                RecoveryStep::RuntimeMode => {
                    return Err(DfuError::RuntimeMode(st.state()));
                }
                RecoveryStep::ClearStatus => {
                    if let Err(err) = self.clear_status() {
                        warn!("DFU_CLRSTATUS failed: {err}");
                    }
                }
                RecoveryStep::Abort => {
                    if let Err(err) = self.abort() {
                        warn!("Can't send DFU_ABORT: {err}");
                    }
                }
                RecoveryStep::Poll => {
                    debug!("Waiting for device to leave {}", st.state());
                }
            }
        }
        Err(DfuError::NotIdle(last_state))
    }

    fn clear_pending_status(
        &self,
        st: DfuStatus,
    ) -> Result<DfuStatus, DfuError> {
        if st.status().is_ok() {
            return Ok(st);
        }
        info!("Clearing status: {}", st.status());
        self.clear_status()?;
        let st = self.get_status()?;
        st.wait();
        st.ret(st)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use crate::{DfuStatusCode, Quirks};

    const GETSTATUS: Request = Request::In {
        request: 3,
        value: 0,
        length: 6,
    };

    fn clrstatus() -> Request {
        Request::out(4, 0, &[])
    }

    fn abort() -> Request {
        Request::out(6, 0, &[])
    }

    #[test]
    fn test_error_cleared_until_idle() {
        let script = Script::new();
        script.push_status(0x0e, DfuState::DfuError);
        script.push_status(0x0e, DfuState::DfuError);
        script.push_status(0, DfuState::DfuIdle);
        let conn = connection(&script, Quirks::empty());

        let st = conn.reset_state().unwrap();
        assert_eq!(st.state(), DfuState::DfuIdle);
        assert_eq!(
            script.requests(),
            vec![
                GETSTATUS,
                clrstatus(),
                GETSTATUS,
                clrstatus(),
                GETSTATUS
            ]
        );
    }

    #[test]
    fn test_runtime_mode_fails_immediately() {
        for state in [DfuState::AppIdle, DfuState::AppDetach] {
            let script = Script::new();
            script.push_status(0, state);
            let conn = connection(&script, Quirks::empty());

            assert!(matches!(
                conn.reset_state(),
                Err(DfuError::RuntimeMode(s)) if s == state
            ));
            assert_eq!(script.requests(), vec![GETSTATUS]);
        }
    }

    #[test]
    fn test_leftover_transfer_is_aborted() {
        let script = Script::new();
        script.push_status(0, DfuState::DfuDownloadIdle);
        script.push_status(0, DfuState::DfuDownloadBusy);
        script.push_status(0, DfuState::DfuUploadIdle);
        script.push_status(0, DfuState::DfuIdle);
        let conn = connection(&script, Quirks::empty());

        conn.reset_state().unwrap();
        assert_eq!(
            script.requests(),
            vec![GETSTATUS, abort(), GETSTATUS, GETSTATUS, abort(), GETSTATUS]
        );
    }

    #[test]
    fn test_idle_with_error_status_is_cleared_once() {
        let script = Script::new();
        script.push_status(0x0b, DfuState::DfuIdle);
        script.push_status(0, DfuState::DfuIdle);
        let conn = connection(&script, Quirks::empty());
        assert_eq!(conn.reset_state().unwrap().status(), DfuStatusCode::Ok);
        assert_eq!(script.requests(), vec![GETSTATUS, clrstatus(), GETSTATUS]);

        let script = Script::new();
        script.push_status(0x0b, DfuState::DfuIdle);
        script.push_status(0x0b, DfuState::DfuIdle);
        let conn = connection(&script, Quirks::empty());
        assert!(matches!(
            conn.reset_state(),
            Err(DfuError::Status {
                status: DfuStatusCode::ErrVendor,
                state: DfuState::DfuIdle
            })
        ));
    }

    #[test]
    fn test_short_status_reply_is_cleared() {
        let script = Script::new();
        script.push_in(vec![0, 0, 0]);
        script.push_status(0, DfuState::DfuIdle);
        let conn = connection(&script, Quirks::empty());

        let st = conn.reset_state().unwrap();
        assert_eq!(st.state(), DfuState::DfuIdle);
        assert_eq!(script.requests(), vec![GETSTATUS, clrstatus(), GETSTATUS]);
    }

    #[test]
    fn test_polls_are_bounded() {
        let script = Script::new();
        for _ in 0..MAX_RECOVERY_POLLS {
            script.push_status(0, DfuState::DfuManifest);
        }
        let conn = connection(&script, Quirks::empty());
        assert!(matches!(
            conn.reset_state(),
            Err(DfuError::NotIdle(DfuState::DfuManifest))
        ));
        assert_eq!(script.requests().len(), MAX_RECOVERY_POLLS);
    }

    #[test]
    fn test_transport_error_is_surfaced() {
        let script = Script::new();
        script.push_error();
        let conn = connection(&script, Quirks::empty());
        assert!(matches!(conn.reset_state(), Err(DfuError::Transfer(_))));
    }

    #[test]
    fn test_next_step_table() {
        assert_eq!(next_step(DfuState::DfuIdle), RecoveryStep::Ready);
        assert_eq!(next_step(DfuState::DfuError), RecoveryStep::ClearStatus);
        assert_eq!(next_step(DfuState::DfuUploadIdle), RecoveryStep::Abort);
        assert_eq!(next_step(DfuState::AppDetach), RecoveryStep::RuntimeMode);
        assert_eq!(next_step(DfuState::Unknown(99)), RecoveryStep::Poll);
    }
}
