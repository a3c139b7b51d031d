/* Facade & component handles: the user-facing API. Thin wrappers that
 * resolve a `(board, net)` pair, register writable outputs for shutdown,
 * and dispatch through the device manager.
 *
 * The `do`/`di`/`ao`/`ai`/`pot`/`can` helpers hand back a small handle
 * bound to one `(board, net)` address, so a caller that touches the same
 * signal repeatedly doesn't have to keep passing `board`/`net` to every
 * call. */

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::warn;

use crate::can_store::{CanFilter, CanMessage, CanRef};
use crate::dbc::DbcCodec;
use crate::dispatcher::Action;
use crate::error::Result;
use crate::manager::DeviceManager;
use crate::resolve::{HilDutCon, Resolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputKind {
    Do,
    Ao,
}

/// The user-facing entry point: resolves `(board, net)` addresses and
/// dispatches actions, tracking writable outputs touched during the session
/// so `close` can return them to high-impedance.
pub struct Facade {
    manager: DeviceManager,
    resolver: Resolver,
    dbc: Box<dyn DbcCodec>,
    shutdown_registry: Mutex<HashMap<(String, String), (HilDutCon, OutputKind)>>,
}

impl Facade {
    pub fn new(manager: DeviceManager, resolver: Resolver, dbc: Box<dyn DbcCodec>) -> Self {
        Self {
            manager,
            resolver,
            dbc,
            shutdown_registry: Mutex::new(HashMap::new()),
        }
    }

    async fn register_output(&self, board: &str, net: &str, con: &HilDutCon, kind: OutputKind) {
        let mut registry = self.shutdown_registry.lock().await;
        registry
            .entry((board.to_string(), net.to_string()))
            .or_insert_with(|| (con.clone(), kind));
    }

    pub async fn set_do(&self, board: &str, net: &str, level: bool) -> Result<()> {
        let con = self.resolver.resolve(board, net)?;
        self.register_output(board, net, &con, OutputKind::Do).await;
        self.manager
            .dispatch(&con.device, &con.port, Action::SetDo(level), self.dbc.as_ref())
            .await?;
        Ok(())
    }

    pub async fn hiz_do(&self, board: &str, net: &str) -> Result<()> {
        let con = self.resolver.resolve(board, net)?;
        self.manager
            .dispatch(&con.device, &con.port, Action::HiZDo, self.dbc.as_ref())
            .await?;
        Ok(())
    }

    pub async fn get_di(&self, board: &str, net: &str) -> Result<bool> {
        let con = self.resolver.resolve(board, net)?;
        self.manager
            .dispatch(&con.device, &con.port, Action::GetDi, self.dbc.as_ref())
            .await?
            .into_bool()
    }

    pub async fn set_ao(&self, board: &str, net: &str, volts: f64) -> Result<()> {
        let con = self.resolver.resolve(board, net)?;
        self.register_output(board, net, &con, OutputKind::Ao).await;
        self.manager
            .dispatch(&con.device, &con.port, Action::SetAo(volts), self.dbc.as_ref())
            .await?;
        Ok(())
    }

    pub async fn hiz_ao(&self, board: &str, net: &str) -> Result<()> {
        let con = self.resolver.resolve(board, net)?;
        self.manager
            .dispatch(&con.device, &con.port, Action::HiZAo, self.dbc.as_ref())
            .await?;
        Ok(())
    }

    pub async fn get_ai(&self, board: &str, net: &str) -> Result<f64> {
        let con = self.resolver.resolve(board, net)?;
        self.manager
            .dispatch(&con.device, &con.port, Action::GetAi, self.dbc.as_ref())
            .await?
            .into_volts()
    }

    pub async fn set_pot(&self, board: &str, net: &str, ohms: f64) -> Result<()> {
        let con = self.resolver.resolve(board, net)?;
        self.manager
            .dispatch(&con.device, &con.port, Action::SetPot(ohms), self.dbc.as_ref())
            .await?;
        Ok(())
    }

    pub async fn send_can(
        &self,
        board: &str,
        net: &str,
        signal: CanRef,
        fields: HashMap<String, f64>,
    ) -> Result<()> {
        let con = self.resolver.resolve(board, net)?;
        self.manager
            .dispatch(
                &con.device,
                &con.port,
                Action::SendCan { signal, fields },
                self.dbc.as_ref(),
            )
            .await?;
        Ok(())
    }

    pub async fn get_last_can(
        &self,
        board: &str,
        net: &str,
        filter: CanFilter,
    ) -> Result<Option<CanMessage>> {
        let con = self.resolver.resolve(board, net)?;
        match self
            .manager
            .dispatch(&con.device, &con.port, Action::GetLastCan { filter }, self.dbc.as_ref())
            .await?
        {
            crate::dispatcher::ActionResult::LastCan(msg) => Ok(msg),
            _ => unreachable!("GetLastCan always produces ActionResult::LastCan"),
        }
    }

    pub async fn get_all_can(
        &self,
        board: &str,
        net: &str,
        filter: CanFilter,
    ) -> Result<Vec<CanMessage>> {
        let con = self.resolver.resolve(board, net)?;
        match self
            .manager
            .dispatch(&con.device, &con.port, Action::GetAllCan { filter }, self.dbc.as_ref())
            .await?
        {
            crate::dispatcher::ActionResult::AllCan(msgs) => Ok(msgs),
            _ => unreachable!("GetAllCan always produces ActionResult::AllCan"),
        }
    }

    pub async fn clear_can(&self, board: &str, net: &str, filter: CanFilter) -> Result<()> {
        let con = self.resolver.resolve(board, net)?;
        self.manager
            .dispatch(&con.device, &con.port, Action::ClearCan { filter }, self.dbc.as_ref())
            .await?;
        Ok(())
    }

    /// Return every touched output to high-impedance, then stop every
    /// serial link. Best-effort: a HiZ failure is logged and does not stop
    /// the rest of the registry from being processed, so a test's teardown
    /// always gets a chance to release every output it set.
    pub async fn close(&self) {
        let registry = std::mem::take(&mut *self.shutdown_registry.lock().await);
        for ((board, net), (con, kind)) in registry {
            let action = match kind {
                OutputKind::Do => Action::HiZDo,
                OutputKind::Ao => Action::HiZAo,
            };
            if let Err(err) = self
                .manager
                .dispatch(&con.device, &con.port, action, self.dbc.as_ref())
                .await
            {
                warn!(board = %board, net = %net, %err, "failed to HiZ output during close");
            }
        }
        self.manager.stop_all().await;
    }

    /// A digital output bound to `(board, net)`.
    pub fn r#do(&self, board: &str, net: &str) -> DoHandle<'_> {
        DoHandle { facade: self, board: board.to_string(), net: net.to_string() }
    }

    /// A digital input bound to `(board, net)`.
    pub fn di(&self, board: &str, net: &str) -> DiHandle<'_> {
        DiHandle { facade: self, board: board.to_string(), net: net.to_string() }
    }

    /// An analog output bound to `(board, net)`.
    pub fn ao(&self, board: &str, net: &str) -> AoHandle<'_> {
        AoHandle { facade: self, board: board.to_string(), net: net.to_string() }
    }

    /// An analog input bound to `(board, net)`.
    pub fn ai(&self, board: &str, net: &str) -> AiHandle<'_> {
        AiHandle { facade: self, board: board.to_string(), net: net.to_string() }
    }

    /// A potentiometer output bound to `(board, net)`.
    pub fn pot(&self, board: &str, net: &str) -> PotHandle<'_> {
        PotHandle { facade: self, board: board.to_string(), net: net.to_string() }
    }

    /// A CAN bus bound to `(board, net)`.
    pub fn can(&self, board: &str, net: &str) -> CanHandle<'_> {
        CanHandle { facade: self, board: board.to_string(), net: net.to_string() }
    }
}

/// A digital output bound to one `(board, net)` address.
pub struct DoHandle<'a> {
    facade: &'a Facade,
    board: String,
    net: String,
}

impl DoHandle<'_> {
    pub async fn set(&self, level: bool) -> Result<()> {
        self.facade.set_do(&self.board, &self.net, level).await
    }

    pub async fn hiz(&self) -> Result<()> {
        self.facade.hiz_do(&self.board, &self.net).await
    }
}

/// A digital input bound to one `(board, net)` address.
pub struct DiHandle<'a> {
    facade: &'a Facade,
    board: String,
    net: String,
}

impl DiHandle<'_> {
    pub async fn get(&self) -> Result<bool> {
        self.facade.get_di(&self.board, &self.net).await
    }
}

/// An analog output bound to one `(board, net)` address.
pub struct AoHandle<'a> {
    facade: &'a Facade,
    board: String,
    net: String,
}

impl AoHandle<'_> {
    pub async fn set(&self, volts: f64) -> Result<()> {
        self.facade.set_ao(&self.board, &self.net, volts).await
    }

    pub async fn hiz(&self) -> Result<()> {
        self.facade.hiz_ao(&self.board, &self.net).await
    }
}

/// An analog input bound to one `(board, net)` address.
pub struct AiHandle<'a> {
    facade: &'a Facade,
    board: String,
    net: String,
}

impl AiHandle<'_> {
    pub async fn get(&self) -> Result<f64> {
        self.facade.get_ai(&self.board, &self.net).await
    }
}

/// A potentiometer output bound to one `(board, net)` address.
pub struct PotHandle<'a> {
    facade: &'a Facade,
    board: String,
    net: String,
}

impl PotHandle<'_> {
    pub async fn set(&self, ohms: f64) -> Result<()> {
        self.facade.set_pot(&self.board, &self.net, ohms).await
    }
}

/// A CAN bus bound to one `(board, net)` address.
pub struct CanHandle<'a> {
    facade: &'a Facade,
    board: String,
    net: String,
}

impl CanHandle<'_> {
    pub async fn send(&self, signal: CanRef, fields: HashMap<String, f64>) -> Result<()> {
        self.facade.send_can(&self.board, &self.net, signal, fields).await
    }

    pub async fn get_last(&self, filter: CanFilter) -> Result<Option<CanMessage>> {
        self.facade.get_last_can(&self.board, &self.net, filter).await
    }

    pub async fn get_all(&self, filter: CanFilter) -> Result<Vec<CanMessage>> {
        self.facade.get_all_can(&self.board, &self.net, filter).await
    }

    pub async fn clear(&self, filter: CanFilter) -> Result<()> {
        self.facade.clear_can(&self.board, &self.net, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbc::StaticDbcCodec;
    use crate::device::{AdcCalibration, Device, Port, PortMode};
    use crate::serial::SerialEngine;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn facade_with_one_device() -> (Facade, tokio::io::DuplexStream) {
        let device = Device::new(
            1,
            "X",
            vec![
                Port { name: "DO1".into(), pin: 1, mode: PortMode::Do },
                Port { name: "DI1".into(), pin: 2, mode: PortMode::Di },
            ],
            vec![],
            vec![],
            AdcCalibration { resolution_bits: 12, ref_v: 3.3, v5_ref: None, v24_ref: None },
            None,
            None,
        );
        let manager = DeviceManager::new(vec![device]);
        let (client, server) = tokio::io::duplex(256);
        let engine = SerialEngine::spawn("X", Box::new(client), &[]);
        manager.attach("X", engine).await.unwrap();

        let mut device_names = HashSet::new();
        device_names.insert("X".to_string());
        let resolver = Resolver::new(device_names, HashMap::new(), HashMap::new());
        let facade = Facade::new(manager, resolver, Box::new(StaticDbcCodec::new()));
        (facade, server)
    }

    #[tokio::test]
    async fn scenario_s6_close_hizs_touched_output() {
        let (facade, mut server) = facade_with_one_device().await;

        facade.set_do("X", "DO1", true).await.unwrap();
        facade.close().await;

        let mut written = [0u8; 5];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut written)
            .await
            .unwrap();
        assert_eq!(written, [0x01, 0x01, 0x01, 0x02, 0x01]);
    }

    #[tokio::test]
    async fn close_is_a_noop_with_nothing_registered() {
        let (facade, _server) = facade_with_one_device().await;
        facade.close().await;
    }

    #[tokio::test]
    async fn do_handle_set_then_hiz_matches_direct_calls() {
        let (facade, mut server) = facade_with_one_device().await;

        let relay = facade.r#do("X", "DO1");
        relay.set(true).await.unwrap();
        relay.hiz().await.unwrap();

        let mut written = [0u8; 5];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut written)
            .await
            .unwrap();
        assert_eq!(written, [0x01, 0x01, 0x01, 0x02, 0x01]);
    }

    #[tokio::test]
    async fn di_handle_get_matches_direct_call() {
        let (facade, mut server) = facade_with_one_device().await;
        tokio::io::AsyncWriteExt::write_all(&mut server, &[3, 1])
            .await
            .unwrap();

        let sense = facade.di("X", "DI1");
        assert!(sense.get().await.unwrap());
    }

    #[tokio::test]
    async fn do_handle_set_registers_output_for_close() {
        let (facade, mut server) = facade_with_one_device().await;

        facade.r#do("X", "DO1").set(true).await.unwrap();
        facade.close().await;

        let mut written = [0u8; 5];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut written)
            .await
            .unwrap();
        assert_eq!(written, [0x01, 0x01, 0x01, 0x02, 0x01]);
    }
}
