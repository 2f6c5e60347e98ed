//! Drivers running complete pairing exchanges over a `PairingTransport`.

use hap_core::error::Result;
use hap_crypto::keys::SessionKeys;
use tracing::{debug, info};

use crate::controller::ControllerIdentity;
use crate::material::PairingMaterial;
use crate::pair_setup::PairSetup;
use crate::pair_verify::PairVerify;
use crate::pairings::{add_pairing_request, check_pairings_response, remove_pairing_request, Permissions};
use crate::setup_code::{PairMethod, SetupCode};
use crate::traits::PairingTransport;

/// Run pair-setup M1-M6 with a freshly generated controller identity.
pub async fn run_pair_setup<T>(
    transport: &mut T,
    method: PairMethod,
    code: &SetupCode,
) -> Result<PairingMaterial>
where
    T: PairingTransport + ?Sized,
{
    let mut setup = PairSetup::new(code, method, ControllerIdentity::generate());
    debug!(?method, controller = %setup.controller().id(), "starting pair-setup");

    let m2 = transport.pair_setup(&setup.generate_m1()?).await?;
    setup.process_m2(&m2)?;

    let m4 = transport.pair_setup(&setup.generate_m3()?).await?;
    setup.process_m4(&m4)?;

    let m6 = transport.pair_setup(&setup.generate_m5()?).await?;
    let material = setup.process_m6(&m6)?;

    info!(accessory = %material.accessory_pairing_id(), "paired");
    Ok(material)
}

/// Run pair-verify M1-M4 and return the control-channel keys.
pub async fn run_pair_verify<T>(transport: &mut T, material: &PairingMaterial) -> Result<SessionKeys>
where
    T: PairingTransport + ?Sized,
{
    let mut verify = PairVerify::new(material);

    let m2 = transport.pair_verify(&verify.generate_m1()?).await?;
    verify.process_m2(&m2)?;

    let m4 = transport.pair_verify(&verify.generate_m3()?).await?;
    verify.process_m4(&m4)
}

/// Register another controller. Requires a verified admin session.
pub async fn add_pairing<T>(
    transport: &mut T,
    controller: &ControllerIdentity,
    permissions: Permissions,
) -> Result<()>
where
    T: PairingTransport + ?Sized,
{
    debug!(controller = %controller.id(), ?permissions, "adding pairing");
    let response = transport
        .pairings(&add_pairing_request(controller, permissions))
        .await?;
    check_pairings_response(&response)
}

/// Remove the controller with `pairing_id`. Requires a verified admin session.
pub async fn remove_pairing<T>(transport: &mut T, pairing_id: &str) -> Result<()>
where
    T: PairingTransport + ?Sized,
{
    debug!(controller = %pairing_id, "removing pairing");
    let response = transport.pairings(&remove_pairing_request(pairing_id)).await?;
    check_pairings_response(&response)
}
