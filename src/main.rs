#![no_std]
#![no_main]

use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_println::println;
use esp_wifi::wifi;
use log::{debug, info, warn};
use smoltcp::iface::SocketStorage;
use static_cell::StaticCell;

use sensor_web::board::{AdcSensor, BoardClock};
use sensor_web::clock::{self, Clock};
use sensor_web::config;
use sensor_web::lease::{LeaseManager, NetworkIdentity};
use sensor_web::net::{NetStack, SOCKET_COUNT};
use sensor_web::session::{Session, SessionError};
use sensor_web::wifi::WiFiManager;

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static SOCKET_STORAGE: StaticCell<[SocketStorage<'static>; SOCKET_COUNT]> = StaticCell::new();
static RX_BUFFER: StaticCell<[u8; config::RX_BUFFER_SIZE]> = StaticCell::new();
static TX_BUFFER: StaticCell<[u8; config::TX_BUFFER_SIZE]> = StaticCell::new();

/// How often the WiFi association is checked from the serve loop
const LINK_CHECK_INTERVAL_MS: u64 = 5_000;

/// Retry delay while the link is not up yet
const LINK_RETRY_DELAY_MS: u32 = 1_000;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[PANIC] {}", info);
    loop {}
}

/// Non-recoverable bring-up fault: report it and wait for an external reset.
fn halt(what: &str) -> ! {
    println!("[BOOT] Fatal: {}", what);
    loop {}
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();

    let cpu_clock = CpuClock::max();
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(cpu_clock));

    // Heap for the WiFi driver (72KB)
    esp_alloc::heap_allocator!(size: 72 * 1024);

    println!();
    println!("=== ESP32-C3 Sensor Web Server v{} ===", sensor_web::VERSION);
    println!("CPU clock: {:?}", cpu_clock);

    let clock = BoardClock::new();

    // Analog input on ADC1 channel 2
    let mut adc_config = AdcConfig::new();
    let sensor_pin = adc_config.enable_pin(peripherals.GPIO2, Attenuation::_11dB);
    let adc = Adc::new(peripherals.ADC1, adc_config);
    let mut sensor = AdcSensor::new(adc, sensor_pin);

    // WiFi driver
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    let mut rng = Rng::new(peripherals.RNG);
    let random_seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());

    let wifi_init = match esp_wifi::init(timer_group0.timer0, rng, peripherals.RADIO_CLK) {
        Ok(init) => WIFI_INIT_CELL.init(init),
        Err(_) => halt("WiFi driver initialization failed"),
    };
    let (wifi_controller, wifi_interfaces) = match wifi::new(wifi_init, peripherals.WIFI) {
        Ok(parts) => parts,
        Err(_) => halt("WiFi controller creation failed"),
    };
    let wifi_device = wifi_interfaces.sta;
    let radio_mac = wifi_device.mac_address();

    // Link check: nothing below works without association
    let mut wifi_manager = WiFiManager::new(wifi_controller);
    while let Err(e) = wifi_manager.connect(config::WIFI_SSID, config::WIFI_PASSWORD, &clock) {
        warn!("[WIFI] Link down ({}), retrying", e);
        clock.sleep_ms(LINK_RETRY_DELAY_MS);
    }
    info!("[BOOT] Link up");

    // WiFi frames are addressed to the radio's own MAC
    let identity = NetworkIdentity::from_config().with_mac(radio_mac);

    let storage = SOCKET_STORAGE.init([SocketStorage::EMPTY; SOCKET_COUNT]);
    let rx_buffer = RX_BUFFER.init([0; config::RX_BUFFER_SIZE]);
    let tx_buffer = TX_BUFFER.init([0; config::TX_BUFFER_SIZE]);
    let mut stack = NetStack::new(
        wifi_device,
        &clock,
        &identity,
        config::SERVER_SOCKET,
        &mut storage[..],
        &mut rx_buffer[..],
        &mut tx_buffer[..],
        random_seed,
    );

    let mut lease = LeaseManager::new(identity);
    lease.initialize(&mut stack);
    if let Err(e) = lease.acquire_lease(&mut stack, config::DHCP_MAX_RETRIES) {
        warn!("[DHCP] {}", e);
    }
    lease.initialize(&mut stack);

    info!("[BOOT] System Loop Start");

    let mut session = Session::new(config::HTTP_PORT);
    let mut last_link_check = clock.now_ms();

    loop {
        stack.poll();
        lease.service(&mut stack);

        match session.drive(&mut stack, &mut sensor) {
            Ok(_) => {}
            // already reported where the socket was reset
            Err(e @ (SessionError::Receive(_) | SessionError::Send(_))) => {
                debug!("[HTTP] Tick ended early: {}", e)
            }
            Err(e) => warn!("[HTTP] {}", e),
        }

        if clock::elapsed(&clock, last_link_check, LINK_CHECK_INTERVAL_MS) {
            wifi_manager.monitor_connection();
            last_link_check = clock.now_ms();
        }

        clock.sleep_ms(1);
    }
}
