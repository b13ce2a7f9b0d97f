/// Picks the configured network with the strongest signal among those
/// visible in a scan. `visible` holds `(ssid, rssi)` pairs.
pub fn strongest<'n>(
    visible: &[(String, i8)],
    networks: &'n [(String, String)],
) -> Option<&'n (String, String)> {
    networks
        .iter()
        .filter_map(|network| {
            visible
                .iter()
                .filter(|(ssid, _)| *ssid == network.0)
                .map(|(_, rssi)| *rssi)
                .max()
                .map(|rssi| (network, rssi))
        })
        .max_by_key(|(_, rssi)| *rssi)
        .map(|(network, _)| network)
}

#[cfg(target_os = "espidf")]
pub mod wifi {
    use anyhow::anyhow;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{
        AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi, ScanMethod,
    };
    use log::*;
    use std::net::Ipv4Addr;

    pub struct Wifi<'a> {
        inner: BlockingWifi<EspWifi<'a>>,
    }

    impl<'a> Wifi<'a> {
        pub fn new(
            modem: esp_idf_svc::hal::modem::Modem,
            sysloop: EspSystemEventLoop,
            nvs: EspDefaultNvsPartition,
        ) -> anyhow::Result<Self> {
            let esp_wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
            let blocking = BlockingWifi::wrap(esp_wifi, sysloop)?;
            Ok(Wifi { inner: blocking })
        }

        /// Scan, then join whichever of `networks` is heard loudest.
        pub fn connect_strongest(&mut self, networks: &[(String, String)]) -> anyhow::Result<()> {
            self.inner
                .set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
            self.inner.start()?;

            let visible: Vec<(String, i8)> = self
                .inner
                .scan()?
                .into_iter()
                .map(|ap| (ap.ssid.as_str().to_string(), ap.signal_strength))
                .collect();
            info!("{} access points visible", visible.len());

            let (ssid, pass) = crate::strongest(&visible, networks)
                .ok_or_else(|| anyhow!("none of {} configured networks visible", networks.len()))?;
            info!("Connecting to {}", ssid);

            self.inner.set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("SSID {} too long", ssid))?,
                password: pass
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("password for {} too long", ssid))?,
                auth_method: if pass.is_empty() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                },
                scan_method: ScanMethod::FastScan,
                ..Default::default()
            }))?;

            self.inner.connect()?;
            self.inner.wait_netif_up()?;

            if !self.inner.is_connected()? {
                return Err(anyhow!("WiFi connection timeout"));
            }
            info!("WiFi connected, address {}", self.address()?);
            Ok(())
        }

        pub fn address(&self) -> anyhow::Result<Ipv4Addr> {
            let ip_info = self.inner.wifi().sta_netif().get_ip_info()?;
            Ok(ip_info.ip.into())
        }

        pub fn disconnect(&mut self) -> anyhow::Result<()> {
            self.inner.disconnect()?;
            self.inner.stop()?;
            Ok(())
        }
    }
}
